//! Terminal ownership and the crossterm keyboard backend.

use crate::config::StartupError;
use crossterm::{
    cursor, execute,
    event::{
        self, Event, KeyCode, KeyEventKind, KeyboardEnhancementFlags, ModifierKeyCode,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    terminal,
};
use pixelpen_common::{InputError, InputSource, Key, KeyEvent, Transition};
use std::{
    io::{self, Write},
    sync::OnceLock,
    time::Duration,
};

/// Raw mode plus alternate screen for as long as it lives. Dropping it, or
/// panicking while it is alive, hands the terminal back in its original
/// state.
pub struct TerminalSession {
    keyboard_enhanced: bool,
}

impl TerminalSession {
    pub fn enter(keyboard_enhanced: bool) -> io::Result<Self> {
        install_panic_hook();

        terminal::enable_raw_mode()?;
        // from here on Drop undoes whatever got enabled
        let session = Self { keyboard_enhanced };

        let mut stdout = io::stdout();
        execute!(stdout, terminal::EnterAlternateScreen, cursor::Hide)?;
        if keyboard_enhanced {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        }

        Ok(session)
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        restore(self.keyboard_enhanced);
    }
}

fn restore(keyboard_enhanced: bool) {
    let mut stdout = io::stdout();
    if keyboard_enhanced {
        let _ = execute!(stdout, PopKeyboardEnhancementFlags);
    }
    let _ = execute!(stdout, cursor::Show, terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
    let _ = stdout.flush();
}

fn install_panic_hook() {
    static HOOK: OnceLock<()> = OnceLock::new();
    HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore(true);
            previous(info);
        }));
    });
}

/// Key releases are essential: without them a held arrow never stops.
pub fn check_release_reporting() -> Result<(), StartupError> {
    match terminal::supports_keyboard_enhancement() {
        Ok(true) => Ok(()),
        Ok(false) => Err(StartupError::UnsupportedTerminal),
        Err(error) => {
            warn!(%error, "keyboard enhancement query failed");
            Err(StartupError::UnsupportedTerminal)
        }
    }
}

fn map_key(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Modifier(ModifierKeyCode::LeftShift) => Key::LeftShift,
        KeyCode::Modifier(ModifierKeyCode::RightShift) => Key::RightShift,
        KeyCode::Modifier(ModifierKeyCode::LeftControl) => Key::LeftCtrl,
        KeyCode::Modifier(ModifierKeyCode::RightControl) => Key::RightCtrl,
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'm' => Key::M,
            'c' => Key::C,
            'f' => Key::F,
            'q' => Key::Q,
            ' ' => Key::Space,
            '[' | '{' => Key::LeftBrace,
            ']' | '}' => Key::RightBrace,
            ',' | '<' => Key::Comma,
            '.' | '>' => Key::Dot,
            '=' => Key::Equal,
            '-' | '_' => Key::Minus,
            '+' => Key::KpPlus,
            _ => return None,
        },
        _ => return None,
    };
    Some(key)
}

fn translate(code: KeyCode, kind: KeyEventKind) -> Option<KeyEvent> {
    let transition = match kind {
        KeyEventKind::Press => Transition::Down,
        KeyEventKind::Repeat => Transition::Repeat,
        KeyEventKind::Release => Transition::Up,
    };
    map_key(code).map(|key| KeyEvent::new(key, transition))
}

/// Key events read from the controlling terminal. Needs a [`TerminalSession`]
/// with keyboard enhancement enabled.
#[derive(Debug, Default)]
pub struct TerminalKeyboard;

impl InputSource for TerminalKeyboard {
    fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError> {
        let mut events = Vec::new();
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                events.extend(translate(key.code, key.kind));
            }
        }
        Ok(events)
    }

    fn label(&self) -> &str {
        "terminal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds_map_to_transitions() {
        assert_eq!(
            translate(KeyCode::Left, KeyEventKind::Press),
            Some(KeyEvent::new(Key::Left, Transition::Down))
        );
        assert_eq!(
            translate(KeyCode::Char('q'), KeyEventKind::Repeat),
            Some(KeyEvent::new(Key::Q, Transition::Repeat))
        );
        assert_eq!(
            translate(
                KeyCode::Modifier(ModifierKeyCode::RightControl),
                KeyEventKind::Release
            ),
            Some(KeyEvent::new(Key::RightCtrl, Transition::Up))
        );
    }

    #[test]
    fn shifted_characters_map_to_the_same_key() {
        assert_eq!(map_key(KeyCode::Char('C')), Some(Key::C));
        assert_eq!(map_key(KeyCode::Char('{')), Some(Key::LeftBrace));
        assert_eq!(map_key(KeyCode::Char('>')), Some(Key::Dot));
    }

    #[test]
    fn everything_else_is_ignored() {
        assert_eq!(map_key(KeyCode::Char('z')), None);
        assert_eq!(map_key(KeyCode::Esc), None);
        assert_eq!(map_key(KeyCode::Modifier(ModifierKeyCode::LeftAlt)), None);
    }
}
