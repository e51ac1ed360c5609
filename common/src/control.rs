//! The single-threaded control loop.
//!
//! Each tick polls the keyboard, applies one-shot and held actions, then runs
//! two independent schedules off the same clock: cursor movement repeat and
//! redraw/fade. Neither schedule ever blocks; the only wait is the short
//! sleep between ticks.

use crate::{
    keys::{InputSource, Key, KeyTracker},
    pixel::{BLACK, Pixel, PixelArray, dim_amount},
    protocol::{DecodeError, Frame, encode_brightness, encode_set_pixel, encode_show},
};
use smart_leds::RGB8;
use std::{
    fmt, io,
    num::{NonZeroU16, NonZeroU32},
    thread,
    time::{Duration, Instant},
};

/// Base cursor repeat rate while a direction is held (60 Hz).
pub const MOVEMENT_REPEAT_INTERVAL: Duration = Duration::from_nanos(16_666_667);
pub const MIN_MOVEMENT_INTERVAL: Duration = Duration::from_millis(2);
/// How soon to look again when no direction is held.
pub const IDLE_MOVEMENT_INTERVAL: Duration = Duration::from_millis(5);
pub const TICK_QUANTUM: Duration = Duration::from_millis(1);

const QUIT_CHORD: [Key; 2] = [Key::LeftCtrl, Key::C];
const SHIFT: [Key; 2] = [Key::LeftShift, Key::RightShift];
const CTRL: [Key; 2] = [Key::LeftCtrl, Key::RightCtrl];
const INCREASE: [Key; 2] = [Key::Equal, Key::KpPlus];
const DECREASE: [Key; 2] = [Key::Minus, Key::KpMinus];

// Up and down jump by different strides.
const MOVES: [(Key, i64); 4] = [(Key::Left, -1), (Key::Right, 1), (Key::Up, 5), (Key::Down, -9)];

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("write to the strip failed")]
    Io(#[from] io::Error),
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },
    #[error("transport already closed")]
    Closed,
    #[error("frame rejected")]
    Rejected(#[from] DecodeError),
}

/// Byte sink towards the strip. Writes must land in order and unsplit.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;

    fn label(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        (**self).write(bytes)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

/// Presentation only. Implementations report their own failures.
pub trait Renderer {
    fn render(&mut self, snapshot: &Snapshot<'_>);
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, snapshot: &Snapshot<'_>) {
        (**self).render(snapshot);
    }
}

pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    /// `+`/`-` move all three channels together.
    Mono,
    /// `+`/`-` only move the active channel.
    Color,
}

impl ColorMode {
    fn toggled(self) -> Self {
        match self {
            Self::Mono => Self::Color,
            Self::Color => Self::Mono,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub fn next(self) -> Self {
        match self {
            Self::Red => Self::Green,
            Self::Green => Self::Blue,
            Self::Blue => Self::Red,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::Red => Self::Blue,
            Self::Green => Self::Red,
            Self::Blue => Self::Green,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Red => 'R',
            Self::Green => 'G',
            Self::Blue => 'B',
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// Blackout already sent. Terminal.
    Quitting,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub led_count: NonZeroU16,
    pub fps: NonZeroU32,
    /// Increment for pen and global brightness adjustments.
    pub step: u8,
    /// Time for a full-scale channel to fade to black.
    pub fade: Duration,
    pub mono: bool,
    pub pen: RGB8,
    pub global_brightness: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            led_count: NonZeroU16::new(288).unwrap_or(NonZeroU16::MIN),
            fps: NonZeroU32::new(50).unwrap_or(NonZeroU32::MIN),
            step: 8,
            fade: Duration::from_secs(1),
            mono: false,
            pen: crate::pixel::DEFAULT_PEN,
            global_brightness: crate::pixel::DEFAULT_GLOBAL_BRIGHTNESS,
        }
    }
}

impl Settings {
    pub fn redraw_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.get()))
    }
}

/// What a renderer gets to see once per redraw.
#[derive(Clone, Copy, Debug)]
pub struct Snapshot<'a> {
    pub selected: u16,
    pub mode: ColorMode,
    pub channel: Channel,
    pub pixels: &'a [Pixel],
    pub pen: RGB8,
    pub global_brightness: u8,
    pub fps: u32,
    pub transport: &'a str,
    pub input: &'a str,
}

impl Snapshot<'_> {
    pub fn led_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn selected_rgb8(&self) -> RGB8 {
        self.pixels
            .get(usize::from(self.selected))
            .map_or(BLACK, Pixel::rgb8)
    }
}

/// All mutable loop state in one place.
#[derive(Clone, Debug)]
pub struct LoopState {
    pub pixels: PixelArray,
    pub keys: KeyTracker,
    pub mode: ColorMode,
    pub channel: Channel,
    pub phase: Phase,
    pub next_movement: Instant,
    pub next_redraw: Instant,
    pub last_redraw: Instant,
    /// Last color written to each LED.
    device: Vec<RGB8>,
}

impl LoopState {
    fn new(settings: &Settings, now: Instant) -> Self {
        let mut pixels = PixelArray::new(settings.led_count);
        let pen = settings.pen;
        pixels.set_pen_color(i32::from(pen.r), i32::from(pen.g), i32::from(pen.b));
        pixels.set_global_brightness(i32::from(settings.global_brightness));

        Self {
            device: vec![BLACK; pixels.led_count()],
            pixels,
            keys: KeyTracker::new(),
            mode: if settings.mono {
                ColorMode::Mono
            } else {
                ColorMode::Color
            },
            channel: Channel::Red,
            phase: Phase::Running,
            next_movement: now,
            next_redraw: now,
            last_redraw: now,
        }
    }

    /// What the strip is currently showing, as far as the loop knows.
    pub fn device_colors(&self) -> &[RGB8] {
        &self.device
    }
}

pub struct ControlLoop<T, I, R, C>
where
    T: Transport,
    I: InputSource,
    R: Renderer,
    C: Clock,
{
    settings: Settings,
    redraw_interval: Duration,
    transport: T,
    input: I,
    renderer: R,
    clock: C,
    state: LoopState,
    closed: bool,
}

impl<T, I, R, C> ControlLoop<T, I, R, C>
where
    T: Transport,
    I: InputSource,
    R: Renderer,
    C: Clock,
{
    pub fn new(settings: Settings, transport: T, input: I, renderer: R, clock: C) -> Self {
        let state = LoopState::new(&settings, clock.now());
        Self {
            redraw_interval: settings.redraw_interval(),
            settings,
            transport,
            input,
            renderer,
            clock,
            state,
            closed: false,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Run until quit. The strip is blacked out and the transport closed on
    /// the way out, whether the loop ended normally or on a write failure.
    pub fn run(mut self) -> Result<(), TransportError> {
        let result = self.start().and_then(|()| self.drive());

        if let Err(error) = &result {
            error!(%error, "transport failed, attempting blackout");
            if let Err(error) = self.blackout() {
                warn!(%error, "blackout after failure did not go through");
            }
        }

        let closed = self.close();
        result.and(closed)
    }

    fn drive(&mut self) -> Result<(), TransportError> {
        while self.tick()? == Phase::Running {
            self.clock.sleep(TICK_QUANTUM);
        }
        info!("quit");
        Ok(())
    }

    /// Bring the strip to a known state: every LED black, global brightness
    /// sent, latched. Also renders once and arms both schedules.
    pub fn start(&mut self) -> Result<(), TransportError> {
        info!(
            leds = self.state.pixels.led_count(),
            transport = self.transport.label(),
            input = self.input.label(),
            "starting control loop"
        );

        self.state.pixels.clear();
        self.push_all(true)?;
        self.render();

        let now = self.clock.now();
        self.state.next_movement = now;
        self.state.last_redraw = now;
        self.state.next_redraw = now + self.redraw_interval;
        Ok(())
    }

    /// One pass of the loop, without the trailing sleep.
    pub fn tick(&mut self) -> Result<Phase, TransportError> {
        if self.state.phase == Phase::Quitting {
            return Ok(Phase::Quitting);
        }

        self.state.keys.poll(&mut self.input);

        let keys = &self.state.keys;
        if keys.is_pressed(&QUIT_CHORD) || keys.down_edge(&[Key::Q]) {
            info!("quit requested");
            self.blackout()?;
            self.state.phase = Phase::Quitting;
            return Ok(Phase::Quitting);
        }

        self.one_shot_actions()?;
        self.held_brightness()?;
        self.adjust_pen();

        let now = self.clock.now();
        if now >= self.state.next_movement {
            self.step_movement(now);
        }
        if now >= self.state.next_redraw {
            self.redraw(now)?;
        }

        Ok(Phase::Running)
    }

    fn one_shot_actions(&mut self) -> Result<(), TransportError> {
        let keys = &self.state.keys;
        let toggle_mode = keys.down_edge(&[Key::M]);
        let prev_channel = keys.down_edge(&[Key::LeftBrace]);
        let next_channel = keys.down_edge(&[Key::RightBrace]);
        let fill = keys.down_edge(&[Key::F]);
        let clear = keys.down_edge(&[Key::C]);
        let show = keys.down_edge(&[Key::Space]);

        if toggle_mode {
            self.state.mode = self.state.mode.toggled();
            debug!(mode = ?self.state.mode, "mode toggled");
        }
        if prev_channel {
            self.state.channel = self.state.channel.prev();
        }
        if next_channel {
            self.state.channel = self.state.channel.next();
        }
        if fill {
            debug!(pen = ?self.state.pixels.pen(), "fill");
            self.state.pixels.fill();
            self.push_all(false)?;
        }
        if clear {
            debug!("clear");
            self.blackout()?;
        }
        if show {
            self.send(encode_show())?;
        }

        Ok(())
    }

    /// Brightness keys repeat at tick rate for as long as they are held.
    fn held_brightness(&mut self) -> Result<(), TransportError> {
        let step = i32::from(self.settings.step);
        if self.state.keys.is_pressed(&[Key::Comma]) {
            self.nudge_brightness(-step)?;
        }
        if self.state.keys.is_pressed(&[Key::Dot]) {
            self.nudge_brightness(step)?;
        }
        Ok(())
    }

    fn nudge_brightness(&mut self, delta: i32) -> Result<(), TransportError> {
        let pixels = &mut self.state.pixels;
        pixels.set_global_brightness(i32::from(pixels.global_brightness()) + delta);

        self.send(encode_brightness(i32::from(
            self.state.pixels.global_brightness(),
        )))?;
        self.send(encode_show())
    }

    fn adjust_pen(&mut self) {
        let keys = &self.state.keys;
        let delta = if keys.any_pressed(&INCREASE) {
            i32::from(self.settings.step)
        } else if keys.any_pressed(&DECREASE) {
            -i32::from(self.settings.step)
        } else {
            return;
        };

        let pen = self.state.pixels.pen();
        let (r, g, b) = (i32::from(pen.r), i32::from(pen.g), i32::from(pen.b));
        let (r, g, b) = match (self.state.mode, self.state.channel) {
            (ColorMode::Mono, _) => {
                let value = r.max(g).max(b) + delta;
                (value, value, value)
            }
            (ColorMode::Color, Channel::Red) => (r + delta, g, b),
            (ColorMode::Color, Channel::Green) => (r, g + delta, b),
            (ColorMode::Color, Channel::Blue) => (r, g, b + delta),
        };
        self.state.pixels.set_pen_color(r, g, b);
    }

    fn step_movement(&mut self, now: Instant) {
        let keys = &self.state.keys;
        let shift = keys.any_pressed(&SHIFT);
        let ctrl = keys.any_pressed(&CTRL);
        let multiplier = match (shift, ctrl) {
            (_, true) => 12,
            (true, false) => 3,
            (false, false) => 1,
        };

        let mut moved = false;
        for (key, delta) in MOVES {
            if keys.is_pressed(&[key]) {
                self.state.pixels.move_selection(delta * multiplier);
                moved = true;
            }
        }

        let wait = if moved {
            let mut interval = MOVEMENT_REPEAT_INTERVAL;
            if shift {
                interval /= 2;
            }
            if ctrl {
                interval /= 2;
            }
            interval.max(MIN_MOVEMENT_INTERVAL)
        } else {
            IDLE_MOVEMENT_INTERVAL
        };
        self.state.next_movement = now + wait;
    }

    fn redraw(&mut self, now: Instant) -> Result<(), TransportError> {
        let elapsed = now.saturating_duration_since(self.state.last_redraw);
        self.state.last_redraw = now;
        self.state
            .pixels
            .dim_all(dim_amount(elapsed, self.settings.fade));

        let changed: Vec<(u16, RGB8)> = self
            .state
            .pixels
            .pixels()
            .iter()
            .zip(&self.state.device)
            .filter(|(pixel, shown)| pixel.rgb8() != **shown)
            .map(|(pixel, _)| (pixel.index(), pixel.rgb8()))
            .collect();

        for &(index, color) in &changed {
            self.send_pixel(index, color)?;
        }
        if !changed.is_empty() {
            trace!(changed = changed.len(), "latching faded pixels");
            self.send(encode_show())?;
        }

        self.render();
        self.state.next_redraw = now + self.redraw_interval;
        Ok(())
    }

    fn render(&mut self) {
        let state = &self.state;
        let snapshot = Snapshot {
            selected: state.pixels.selected(),
            mode: state.mode,
            channel: state.channel,
            pixels: state.pixels.pixels(),
            pen: state.pixels.pen(),
            global_brightness: state.pixels.global_brightness(),
            fps: self.settings.fps.get(),
            transport: self.transport.label(),
            input: self.input.label(),
        };
        self.renderer.render(&snapshot);
    }

    /// Every LED black, then a single latch. The loop keeps running.
    fn blackout(&mut self) -> Result<(), TransportError> {
        self.state.pixels.clear();
        self.push_all(false)
    }

    /// Write every LED's model color, optionally the global brightness, and
    /// latch once.
    fn push_all(&mut self, with_brightness: bool) -> Result<(), TransportError> {
        for index in 0..self.settings.led_count.get() {
            let color = self.state.pixels.get_rgb8(index).unwrap_or(BLACK);
            self.send_pixel(index, color)?;
        }
        if with_brightness {
            let brightness = i32::from(self.state.pixels.global_brightness());
            self.send(encode_brightness(brightness))?;
        }
        self.send(encode_show())
    }

    fn send_pixel(&mut self, index: u16, color: RGB8) -> Result<(), TransportError> {
        self.send(encode_set_pixel(index, color.r, color.g, color.b))?;
        if let Some(shown) = self.state.device.get_mut(usize::from(index)) {
            *shown = color;
        }
        Ok(())
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let written = self.transport.write(&frame)?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}

impl<T, I, R, C> Drop for ControlLoop<T, I, R, C>
where
    T: Transport,
    I: InputSource,
    R: Renderer,
    C: Clock,
{
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.state.phase == Phase::Running {
            if let Err(error) = self.blackout() {
                warn!(%error, "blackout on drop failed");
            }
        }
        if let Err(error) = self.close() {
            warn!(%error, "closing transport on drop failed");
        }
    }
}
