use pixelpen_common::Settings;
use std::{
    io,
    num::{NonZeroU16, NonZeroU32},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("no serial port looks like an LED controller (detected: {})", list(.detected))]
    NoSerialPort { detected: Vec<String> },
    #[error("failed to open serial port {port}")]
    OpenSerial {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("no keyboard input device found, pass --kbd")]
    NoKeyboard,
    #[error("failed to open keyboard device {}", .path.display())]
    OpenKeyboard {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("this terminal cannot report key releases, use --input evdev")]
    UnsupportedTerminal,
    #[cfg(not(target_os = "linux"))]
    #[error("evdev input is only available on linux, use --input terminal")]
    NoEvdev,
    #[error("invalid setting: {0}")]
    Invalid(String),
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_owned()
    } else {
        names.join(", ")
    }
}

impl StartupError {
    /// 2 when a device was found but could not be opened, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::OpenSerial { .. } | Self::OpenKeyboard { .. } => 2,
            _ => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputKind {
    #[default]
    Evdev,
    Terminal,
}

impl FromStr for InputKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "evdev" => Ok(Self::Evdev),
            "terminal" => Ok(Self::Terminal),
            other => Err(format!("unknown input backend `{other}` (expected evdev or terminal)")),
        }
    }
}

#[derive(Clone, argh::FromArgs)]
/// Paint on a WS2812 strip from the keyboard
pub struct Args {
    #[argh(option)]
    /// serial port of the strip controller (auto-detected when absent)
    pub port: Option<String>,

    #[argh(option, default = "1_000_000")]
    /// serial baud rate
    pub baud: u32,

    #[argh(option, default = "288")]
    /// number of LEDs on the strip
    pub num_leds: u16,

    #[argh(option, default = "50")]
    /// redraw rate in frames per second
    pub fps: u32,

    #[argh(option, default = "8")]
    /// increment for pen color and brightness keys
    pub step: u8,

    #[argh(option)]
    /// evdev keyboard device (auto-detected when absent)
    pub kbd: Option<PathBuf>,

    #[argh(option, default = "1000")]
    /// milliseconds for a full-scale channel to fade to black
    pub fade_ms: u64,

    #[argh(option, default = "64")]
    /// initial global brightness
    pub brightness: u8,

    #[argh(switch)]
    /// start in mono mode
    pub mono: bool,

    #[argh(option, default = "InputKind::Evdev")]
    /// keyboard backend: evdev or terminal
    pub input: InputKind,

    #[argh(switch)]
    /// grab the evdev keyboard exclusively
    pub grab: bool,

    #[argh(switch)]
    /// no terminal UI, log to stderr instead
    pub headless: bool,

    #[argh(switch)]
    /// decode and log frames instead of opening a serial port
    pub dry_run: bool,

    #[argh(option, default = "2000")]
    /// milliseconds to wait for the board to reset after opening the port
    pub reset_delay_ms: u64,

    #[argh(option)]
    /// write logs to this file
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn settings(&self) -> Result<Settings, StartupError> {
        let led_count = NonZeroU16::new(self.num_leds)
            .ok_or_else(|| StartupError::Invalid("--num-leds must be at least 1".into()))?;
        let fps = NonZeroU32::new(self.fps)
            .ok_or_else(|| StartupError::Invalid("--fps must be at least 1".into()))?;
        if self.fade_ms == 0 {
            return Err(StartupError::Invalid("--fade-ms must be at least 1".into()));
        }

        Ok(Settings {
            led_count,
            fps,
            step: self.step,
            fade: Duration::from_millis(self.fade_ms),
            mono: self.mono,
            pen: Settings::default().pen,
            global_brightness: self.brightness,
        })
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }
}
