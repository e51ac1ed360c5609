//! Held-key and edge tracking on top of a raw key event source.

use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Every key the control loop reacts to. Backends translate their own key
/// codes into this set and drop anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Key {
    Left,
    Right,
    Up,
    Down,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
    M,
    C,
    F,
    Q,
    Space,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Equal,
    Minus,
    KpPlus,
    KpMinus,
}

impl Key {
    pub const ALL: [Key; 21] = [
        Key::Left,
        Key::Right,
        Key::Up,
        Key::Down,
        Key::LeftShift,
        Key::RightShift,
        Key::LeftCtrl,
        Key::RightCtrl,
        Key::M,
        Key::C,
        Key::F,
        Key::Q,
        Key::Space,
        Key::LeftBrace,
        Key::RightBrace,
        Key::Comma,
        Key::Dot,
        Key::Equal,
        Key::Minus,
        Key::KpPlus,
        Key::KpMinus,
    ];

    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Down,
    /// Auto-repeat while held. Counts as held, never as a fresh press.
    Repeat,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub transition: Transition,
}

impl KeyEvent {
    pub fn new(key: Key, transition: Transition) -> Self {
        Self { key, transition }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input device disconnected")]
    Disconnected,
    #[error("input device read failed")]
    Io(#[from] io::Error),
}

/// A non-blocking source of key transitions.
pub trait InputSource {
    /// Everything that happened since the last call. Empty when nothing is
    /// pending; must never block.
    fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError>;

    /// Short human-readable name, shown in the UI.
    fn label(&self) -> &str;
}

impl<S: InputSource + ?Sized> InputSource for Box<S> {
    fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError> {
        (**self).poll()
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

/// Wraps an input source and injects a `Q` press once `flag` is raised, so an
/// outside quit request takes the same path as the key.
pub struct QuitOnFlag<S> {
    inner: S,
    flag: Arc<AtomicBool>,
}

impl<S: InputSource> QuitOnFlag<S> {
    pub fn new(inner: S, flag: Arc<AtomicBool>) -> Self {
        Self { inner, flag }
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: InputSource> InputSource for QuitOnFlag<S> {
    fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError> {
        if self.flag.swap(false, Ordering::Relaxed) {
            info!("quit requested from outside");
            return Ok(vec![
                KeyEvent::new(Key::Q, Transition::Up),
                KeyEvent::new(Key::Q, Transition::Down),
            ]);
        }
        self.inner.poll()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }
}

/// Fixed-size set of [`Key`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct KeySet(u32);

impl KeySet {
    pub fn contains(&self, key: Key) -> bool {
        self.0 & key.bit() != 0
    }

    pub fn contains_all(&self, keys: &[Key]) -> bool {
        keys.iter().all(|key| self.contains(*key))
    }

    pub fn insert(&mut self, key: Key) {
        self.0 |= key.bit();
    }

    pub fn remove(&mut self, key: Key) {
        self.0 &= !key.bit();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        Key::ALL.into_iter().filter(|key| self.contains(*key))
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct KeyTracker {
    pressed: KeySet,
    down_edge: KeySet,
    up_edge: KeySet,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain pending transitions from `source`.
    ///
    /// Edge sets only describe this poll. A failing source is logged and
    /// otherwise ignored: the held set stays as it was.
    pub fn poll<S: InputSource + ?Sized>(&mut self, source: &mut S) {
        self.down_edge.clear();
        self.up_edge.clear();

        match source.poll() {
            Ok(events) => {
                for event in events {
                    self.apply(event);
                }
            }
            Err(error) => {
                warn!(?error, source = source.label(), "keyboard poll failed");
            }
        }
    }

    fn apply(&mut self, event: KeyEvent) {
        let KeyEvent { key, transition } = event;
        match transition {
            Transition::Down | Transition::Repeat => {
                if !self.pressed.contains(key) {
                    self.down_edge.insert(key);
                }
                self.pressed.insert(key);
            }
            Transition::Up => {
                self.pressed.remove(key);
                self.up_edge.insert(key);
            }
        }
    }

    /// All of `keys` are held right now.
    pub fn is_pressed(&self, keys: &[Key]) -> bool {
        self.pressed.contains_all(keys)
    }

    /// All of `keys` went down during the last poll.
    pub fn down_edge(&self, keys: &[Key]) -> bool {
        self.down_edge.contains_all(keys)
    }

    pub fn up_edge(&self, keys: &[Key]) -> bool {
        self.up_edge.contains_all(keys)
    }

    pub fn any_pressed(&self, keys: &[Key]) -> bool {
        keys.iter().any(|key| self.pressed.contains(*key))
    }

    pub fn pressed(&self) -> KeySet {
        self.pressed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out one scripted batch per poll, then nothing.
    #[derive(Default)]
    pub(crate) struct ScriptedInput {
        pub(crate) batches: VecDeque<Result<Vec<KeyEvent>, InputError>>,
    }

    impl ScriptedInput {
        pub(crate) fn push(&mut self, events: &[(Key, Transition)]) {
            let events = events
                .iter()
                .map(|(key, transition)| KeyEvent::new(*key, *transition))
                .collect();
            self.batches.push_back(Ok(events));
        }

        pub(crate) fn push_error(&mut self) {
            self.batches.push_back(Err(InputError::Disconnected));
        }

        pub(crate) fn idle(&mut self) {
            self.batches.push_back(Ok(Vec::new()));
        }
    }

    impl InputSource for ScriptedInput {
        fn poll(&mut self) -> Result<Vec<KeyEvent>, InputError> {
            self.batches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn label(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn down_edge_fires_once_per_press() {
        let mut input = ScriptedInput::default();
        input.push(&[(Key::Q, Transition::Down)]);
        input.push(&[(Key::Q, Transition::Repeat)]);
        input.idle();
        input.push(&[(Key::Q, Transition::Up)]);
        input.idle();

        let mut keys = KeyTracker::new();

        keys.poll(&mut input);
        assert!(keys.down_edge(&[Key::Q]));
        assert!(keys.is_pressed(&[Key::Q]));

        keys.poll(&mut input);
        assert!(!keys.down_edge(&[Key::Q]));
        assert!(keys.is_pressed(&[Key::Q]));

        keys.poll(&mut input);
        assert!(!keys.down_edge(&[Key::Q]));
        assert!(keys.is_pressed(&[Key::Q]));

        keys.poll(&mut input);
        assert!(!keys.down_edge(&[Key::Q]));
        assert!(!keys.is_pressed(&[Key::Q]));
        assert!(keys.up_edge(&[Key::Q]));

        keys.poll(&mut input);
        assert!(!keys.up_edge(&[Key::Q]));
    }

    #[test]
    fn repeat_without_down_counts_as_press() {
        // a key already held when the device was opened shows up as repeat
        let mut input = ScriptedInput::default();
        input.push(&[(Key::Left, Transition::Repeat)]);

        let mut keys = KeyTracker::new();
        keys.poll(&mut input);
        assert!(keys.is_pressed(&[Key::Left]));
        assert!(keys.down_edge(&[Key::Left]));
    }

    #[test]
    fn chords_need_every_key() {
        let mut input = ScriptedInput::default();
        input.push(&[(Key::LeftCtrl, Transition::Down)]);
        input.push(&[(Key::C, Transition::Down)]);

        let mut keys = KeyTracker::new();
        keys.poll(&mut input);
        assert!(!keys.is_pressed(&[Key::LeftCtrl, Key::C]));

        keys.poll(&mut input);
        assert!(keys.is_pressed(&[Key::LeftCtrl, Key::C]));
        assert!(keys.down_edge(&[Key::C]));
        assert!(!keys.down_edge(&[Key::LeftCtrl, Key::C]));
    }

    #[test]
    fn press_and_release_in_one_poll() {
        let mut input = ScriptedInput::default();
        input.push(&[(Key::Space, Transition::Down), (Key::Space, Transition::Up)]);

        let mut keys = KeyTracker::new();
        keys.poll(&mut input);
        assert!(keys.down_edge(&[Key::Space]));
        assert!(keys.up_edge(&[Key::Space]));
        assert!(!keys.is_pressed(&[Key::Space]));
    }

    #[test]
    fn device_errors_keep_held_keys() {
        let mut input = ScriptedInput::default();
        input.push(&[(Key::Right, Transition::Down), (Key::M, Transition::Down)]);
        input.push_error();

        let mut keys = KeyTracker::new();
        keys.poll(&mut input);
        let held = keys.pressed();

        keys.poll(&mut input);
        assert_eq!(keys.pressed(), held);
        assert!(!keys.down_edge(&[Key::M]));
    }

    #[test]
    fn raised_flag_injects_a_fresh_q_press() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut input = QuitOnFlag::new(ScriptedInput::default(), Arc::clone(&flag));
        input.inner_mut().push(&[(Key::Q, Transition::Down)]);
        input.inner_mut().idle();

        let mut keys = KeyTracker::new();
        keys.poll(&mut input);
        assert!(keys.down_edge(&[Key::Q]));

        // Q is still held, the injected release makes the press count again
        flag.store(true, Ordering::Relaxed);
        keys.poll(&mut input);
        assert!(keys.down_edge(&[Key::Q]));
        assert!(!flag.load(Ordering::Relaxed));

        keys.poll(&mut input);
        assert!(!keys.down_edge(&[Key::Q]));
        assert_eq!(input.label(), "scripted");
    }

    #[test]
    fn key_set_bits_are_distinct() {
        let mut set = KeySet::default();
        for key in Key::ALL {
            assert!(!set.contains(key));
            set.insert(key);
        }
        assert_eq!(set.iter().count(), Key::ALL.len());
        set.remove(Key::Dot);
        assert!(!set.contains(Key::Dot));
        assert!(set.contains(Key::Comma));
    }
}
