#[macro_use]
extern crate tracing;

use self::{
    config::{Args, InputKind, StartupError},
    dry_run::DryRunTransport,
    render::{HeadlessRenderer, TerminalRenderer},
    serial::SerialTransport,
    terminal::{TerminalKeyboard, TerminalSession},
};
use anyhow::Context;
use pixelpen_common::{ControlLoop, InputSource, QuitOnFlag, Renderer, SystemClock, Transport};
use std::{fs::File, io, process::ExitCode, sync::Mutex};
use tracing_subscriber::EnvFilter;

mod config;
mod dry_run;
#[cfg(target_os = "linux")]
mod keyboard;
mod render;
mod serial;
mod signals;
mod terminal;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// The terminal UI owns the screen, so logs only go to stderr when there is
/// no UI.
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = &args.log_file {
        let file = File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else if args.headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn open_evdev(args: &Args) -> Result<Box<dyn InputSource>, StartupError> {
    let path = match &args.kbd {
        Some(path) => path.clone(),
        None => keyboard::detect_keyboard()?,
    };
    Ok(Box::new(keyboard::EvdevKeyboard::open(&path, args.grab)?))
}

#[cfg(not(target_os = "linux"))]
fn open_evdev(_args: &Args) -> Result<Box<dyn InputSource>, StartupError> {
    Err(StartupError::NoEvdev)
}

fn open_input(args: &Args) -> Result<Box<dyn InputSource>, StartupError> {
    match args.input {
        InputKind::Evdev => open_evdev(args),
        InputKind::Terminal => {
            if args.headless {
                return Err(StartupError::Invalid(
                    "--input terminal needs the terminal UI, drop --headless".into(),
                ));
            }
            terminal::check_release_reporting()?;
            Ok(Box::new(TerminalKeyboard))
        }
    }
}

fn open_transport(args: &Args) -> Result<Box<dyn Transport>, StartupError> {
    if args.dry_run {
        info!("dry run, no serial port will be opened");
        return Ok(Box::new(DryRunTransport::new()));
    }

    let port = match &args.port {
        Some(port) => port.clone(),
        None => serial::detect_port()?,
    };
    Ok(Box::new(SerialTransport::open(
        &port,
        args.baud,
        args.reset_delay(),
    )?))
}

fn run(args: &Args) -> anyhow::Result<()> {
    let settings = args.settings()?;
    let input = open_input(args)?;
    let transport = open_transport(args)?;

    let session = if args.headless {
        None
    } else {
        let session = TerminalSession::enter(args.input == InputKind::Terminal)
            .context("failed to set up the terminal")?;
        Some(session)
    };
    let renderer: Box<dyn Renderer> = if args.headless {
        Box::new(HeadlessRenderer::new())
    } else {
        Box::new(TerminalRenderer::new())
    };

    let quit = signals::quit_flag().context("failed to install signal handlers")?;
    let input = QuitOnFlag::new(input, quit);

    let result = ControlLoop::new(settings, transport, input, renderer, SystemClock).run();
    drop(session);

    result.context("lost the connection to the strip")
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    if let Err(error) = init_logging(&args) {
        eprintln!("pixelpen: {error:#}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(?error, "exiting");
            eprintln!("pixelpen: {error:#}");
            let code = error
                .downcast_ref::<StartupError>()
                .map_or(1, StartupError::exit_code);
            ExitCode::from(code)
        }
    }
}
