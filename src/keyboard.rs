//! Raw keyboard input from a Linux evdev device.

use crate::config::StartupError;
use evdev::{Device, EventType, KeyCode};
use pixelpen_common::{InputError, InputSource, Key, KeyEvent, Transition};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, TryRecvError},
    thread,
};

const KEYMAP: [(KeyCode, Key); 21] = [
    (KeyCode::KEY_LEFT, Key::Left),
    (KeyCode::KEY_RIGHT, Key::Right),
    (KeyCode::KEY_UP, Key::Up),
    (KeyCode::KEY_DOWN, Key::Down),
    (KeyCode::KEY_LEFTSHIFT, Key::LeftShift),
    (KeyCode::KEY_RIGHTSHIFT, Key::RightShift),
    (KeyCode::KEY_LEFTCTRL, Key::LeftCtrl),
    (KeyCode::KEY_RIGHTCTRL, Key::RightCtrl),
    (KeyCode::KEY_M, Key::M),
    (KeyCode::KEY_C, Key::C),
    (KeyCode::KEY_F, Key::F),
    (KeyCode::KEY_Q, Key::Q),
    (KeyCode::KEY_SPACE, Key::Space),
    (KeyCode::KEY_LEFTBRACE, Key::LeftBrace),
    (KeyCode::KEY_RIGHTBRACE, Key::RightBrace),
    (KeyCode::KEY_COMMA, Key::Comma),
    (KeyCode::KEY_DOT, Key::Dot),
    (KeyCode::KEY_EQUAL, Key::Equal),
    (KeyCode::KEY_MINUS, Key::Minus),
    (KeyCode::KEY_KPPLUS, Key::KpPlus),
    (KeyCode::KEY_KPMINUS, Key::KpMinus),
];

fn translate(code: u16, value: i32) -> Option<KeyEvent> {
    let transition = match value {
        0 => Transition::Up,
        1 => Transition::Down,
        2 => Transition::Repeat,
        _ => return None,
    };
    KEYMAP
        .iter()
        .find(|(keycode, _)| keycode.code() == code)
        .map(|(_, key)| KeyEvent::new(*key, transition))
}

fn looks_like_a_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .is_some_and(|keys| keys.contains(KeyCode::KEY_A) && keys.contains(KeyCode::KEY_SPACE))
}

fn sorted_entries(dir: &Path, filter: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(&filter)
        })
        .collect();
    paths.sort();
    paths
}

/// Stable by-id keyboard links first, then any event node with letter keys.
pub fn detect_keyboard() -> Result<PathBuf, StartupError> {
    let by_id = sorted_entries(Path::new("/dev/input/by-id"), |name| {
        name.ends_with("-event-kbd")
    });
    if let Some(path) = by_id.into_iter().next() {
        return Ok(path);
    }

    sorted_entries(Path::new("/dev/input"), |name| name.starts_with("event"))
        .into_iter()
        .find(|path| Device::open(path).is_ok_and(|device| looks_like_a_keyboard(&device)))
        .ok_or(StartupError::NoKeyboard)
}

/// A path that does not exist is a missing keyboard, not a broken one.
fn open_error(path: &Path, source: io::Error) -> StartupError {
    if source.kind() == io::ErrorKind::NotFound {
        warn!(path = %path.display(), "keyboard device does not exist");
        StartupError::NoKeyboard
    } else {
        StartupError::OpenKeyboard {
            path: path.to_owned(),
            source,
        }
    }
}

pub struct EvdevKeyboard {
    batches: Receiver<io::Result<Vec<KeyEvent>>>,
    label: String,
    gone: bool,
}

impl EvdevKeyboard {
    /// Open `path` and start reading it on a background thread so polling
    /// never blocks.
    pub fn open(path: &Path, grab: bool) -> Result<Self, StartupError> {
        let mut device = Device::open(path).map_err(|source| open_error(path, source))?;
        let label = device
            .name()
            .map_or_else(|| path.display().to_string(), str::to_owned);

        if grab {
            match device.grab() {
                Ok(()) => info!(keyboard = %label, "keyboard grabbed"),
                Err(error) => warn!(%error, keyboard = %label, "keyboard grab failed"),
            }
        }
        info!(path = %path.display(), keyboard = %label, "keyboard open");

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("evdev".into())
            .spawn(move || {
                loop {
                    let batch = device.fetch_events().map(|events| {
                        events
                            .filter(|event| event.event_type() == EventType::KEY)
                            .filter_map(|event| translate(event.code(), event.value()))
                            .collect::<Vec<_>>()
                    });

                    let failed = batch.is_err();
                    if matches!(&batch, Ok(events) if events.is_empty()) {
                        continue;
                    }
                    if tx.send(batch).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|source| StartupError::OpenKeyboard {
                path: path.to_owned(),
                source,
            })?;

        Ok(Self {
            batches: rx,
            label,
            gone: false,
        })
    }
}

impl InputSource for EvdevKeyboard {
    fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError> {
        let mut events = Vec::new();
        if self.gone {
            return Ok(events);
        }

        loop {
            match self.batches.try_recv() {
                Ok(Ok(batch)) => events.extend(batch),
                Ok(Err(error)) => {
                    self.gone = true;
                    return Err(InputError::Io(error));
                }
                Err(TryRecvError::Empty) => return Ok(events),
                Err(TryRecvError::Disconnected) => {
                    self.gone = true;
                    return Err(InputError::Disconnected);
                }
            }
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}
