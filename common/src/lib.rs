//! Core of the strip painter: wire protocol, pixel model, key tracking and
//! the control loop that ties them together. Everything here runs without a
//! device attached; the binary supplies the real transport, keyboard and
//! screen.

#[macro_use]
extern crate tracing;

pub mod control;
pub mod keys;
pub mod pixel;
pub mod protocol;

pub use control::{
    Channel, Clock, ColorMode, ControlLoop, LoopState, Phase, Renderer, Settings, Snapshot,
    SystemClock, Transport, TransportError,
};
pub use keys::{InputError, InputSource, Key, KeyEvent, KeyTracker, QuitOnFlag, Transition};
pub use pixel::{Pixel, PixelArray};
pub use protocol::{Command, Frame, FrameDecoder};
pub use smart_leds::RGB8;
