//! Concealed input patterns.
//!
//! Raw input events go in; at most one [`InputSignal`] comes out. This
//! matcher never touches mode state itself: the runtime decides what a
//! signal means, which keeps the bypass paths auditable on their own.

use std::time::Duration;

use bitflags::bitflags;
use tokio::time::Instant;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        const CTRL  = 1 << 0;
        const SHIFT = 1 << 1;
        const ALT   = 1 << 2;
        const META  = 1 << 3;
    }
}

impl Modifiers {
    /// Parse names such as `"ctrl"`, `"shift"`. Unknown names are `None`.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut out = Modifiers::empty();
        for name in names {
            out |= match name.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => Modifiers::CTRL,
                "shift" => Modifiers::SHIFT,
                "alt" => Modifiers::ALT,
                "meta" | "super" | "cmd" => Modifiers::META,
                _ => return None,
            };
        }
        Some(out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A pointer/touch activation. `hidden_region` is true when it
    /// landed on the concealed admin hot spot.
    Tap { hidden_region: bool, at: Instant },
    Key { key: char, modifiers: Modifiers, at: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSignal {
    /// Show the "Admin Access" affordance. Still goes through the gate.
    RevealAdminAffordance,
    /// Ungated jump to Admin.
    EmergencyAccess,
}

/// N activations with no gap longer than `window` between them.
#[derive(Debug, Clone)]
pub struct TapCluster {
    threshold: u32,
    window: Duration,
    count: u32,
    last: Option<Instant>,
}

impl TapCluster {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            count: 0,
            last: None,
        }
    }

    /// Returns `true` on the activation that completes the cluster.
    pub fn register(&mut self, at: Instant) -> bool {
        if let Some(last) = self.last {
            if at.saturating_duration_since(last) > self.window {
                self.count = 0;
            }
        }
        self.count += 1;
        self.last = Some(at);

        if self.count >= self.threshold {
            self.count = 0;
            self.last = None;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Ordered key sequence typed while the modifier chord is held.
///
/// A wrong key keeps whatever tail of the input still starts the
/// sequence, so "AAB" accepts A, A, A, B.
#[derive(Debug, Clone)]
pub struct KeySequence {
    modifiers: Modifiers,
    keys: Vec<char>,
    /// `fallback[i]`: longest proper prefix of `keys[..=i]` that is also
    /// its suffix.
    fallback: Vec<usize>,
    window: Duration,
    progress: usize,
    last: Option<Instant>,
}

impl KeySequence {
    pub fn new(modifiers: Modifiers, sequence: &str, window: Duration) -> Self {
        let keys: Vec<char> = sequence.chars().map(|c| c.to_ascii_uppercase()).collect();
        Self {
            modifiers,
            fallback: prefix_function(&keys),
            keys,
            window,
            progress: 0,
            last: None,
        }
    }

    pub fn register(&mut self, key: char, modifiers: Modifiers, at: Instant) -> bool {
        if self.keys.is_empty() {
            return false;
        }
        if let Some(last) = self.last {
            if at.saturating_duration_since(last) > self.window {
                self.reset();
            }
        }
        if !modifiers.contains(self.modifiers) {
            self.reset();
            return false;
        }

        let key = key.to_ascii_uppercase();
        let mut progress = self.progress;
        while key != self.keys[progress] {
            if progress == 0 {
                self.reset();
                return false;
            }
            progress = self.fallback[progress - 1];
        }
        self.progress = progress + 1;
        self.last = Some(at);

        if self.progress == self.keys.len() {
            self.reset();
            return true;
        }
        false
    }

    fn reset(&mut self) {
        self.progress = 0;
        self.last = None;
    }
}

fn prefix_function(keys: &[char]) -> Vec<usize> {
    let mut fallback = vec![0; keys.len()];
    let mut len = 0;
    for i in 1..keys.len() {
        while len > 0 && keys[i] != keys[len] {
            len = fallback[len - 1];
        }
        if keys[i] == keys[len] {
            len += 1;
        }
        fallback[i] = len;
    }
    fallback
}

/// Tunables for both concealed paths.
#[derive(Debug, Clone)]
pub struct InputPatternConfig {
    pub tap_threshold: u32,
    pub tap_window: Duration,
    pub sequence: String,
    pub sequence_modifiers: Modifiers,
    pub sequence_window: Duration,
    pub sequence_enabled: bool,
}

impl Default for InputPatternConfig {
    fn default() -> Self {
        Self {
            tap_threshold: 5,
            tap_window: Duration::from_secs(3),
            sequence: "ADMIN".to_string(),
            sequence_modifiers: Modifiers::CTRL | Modifiers::SHIFT,
            sequence_window: Duration::from_secs(5),
            sequence_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InputPatternMatcher {
    taps: TapCluster,
    sequence: Option<KeySequence>,
}

impl InputPatternMatcher {
    pub fn new(config: &InputPatternConfig) -> Self {
        let sequence = config.sequence_enabled.then(|| {
            KeySequence::new(
                config.sequence_modifiers,
                &config.sequence,
                config.sequence_window,
            )
        });
        Self {
            taps: TapCluster::new(config.tap_threshold, config.tap_window),
            sequence,
        }
    }

    pub fn handle(&mut self, event: &InputEvent) -> Option<InputSignal> {
        match *event {
            InputEvent::Tap { hidden_region: true, at } => self
                .taps
                .register(at)
                .then_some(InputSignal::RevealAdminAffordance),
            InputEvent::Tap { .. } => None,
            InputEvent::Key { key, modifiers, at } => {
                let seq = self.sequence.as_mut()?;
                seq.register(key, modifiers, at)
                    .then_some(InputSignal::EmergencyAccess)
            }
        }
    }
}

impl Default for InputPatternMatcher {
    fn default() -> Self {
        Self::new(&InputPatternConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn five_quick_taps_reveal() {
        let mut cluster = TapCluster::new(5, Duration::from_secs(3));
        let t0 = Instant::now();
        for i in 0..4 {
            assert!(!cluster.register(ms(t0, i * 2_900)));
        }
        assert!(cluster.register(ms(t0, 4 * 2_900)));
        assert_eq!(cluster.count(), 0);
    }

    #[test]
    fn slow_tap_resets_counter() {
        let mut cluster = TapCluster::new(5, Duration::from_secs(3));
        let t0 = Instant::now();
        for i in 0..4 {
            cluster.register(ms(t0, i * 100));
        }
        // 3.1s gap: starts over at one.
        assert!(!cluster.register(ms(t0, 300 + 3_100)));
        assert_eq!(cluster.count(), 1);
        for i in 1..4 {
            assert!(!cluster.register(ms(t0, 3_400 + i * 100)));
        }
        assert!(cluster.register(ms(t0, 3_400 + 400)));
    }

    #[test]
    fn sequence_requires_modifiers() {
        let mut seq = KeySequence::new(Modifiers::CTRL | Modifiers::SHIFT, "ADMIN", Duration::from_secs(5));
        let t0 = Instant::now();
        let chord = Modifiers::CTRL | Modifiers::SHIFT;

        for (i, c) in "ADMI".chars().enumerate() {
            assert!(!seq.register(c, chord, ms(t0, i as u64 * 100)));
        }
        // Modifiers released on the last key.
        assert!(!seq.register('N', Modifiers::empty(), ms(t0, 500)));

        for (i, c) in "admin".chars().enumerate() {
            let hit = seq.register(c, chord, ms(t0, 1_000 + i as u64 * 100));
            assert_eq!(hit, i == 4);
        }
    }

    #[test]
    fn sequence_idle_window_expires() {
        let mut seq = KeySequence::new(Modifiers::CTRL, "AB", Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(!seq.register('A', Modifiers::CTRL, t0));
        assert!(!seq.register('B', Modifiers::CTRL, ms(t0, 5_001)));
    }

    #[test]
    fn wrong_key_restarts_on_first_key() {
        let mut seq = KeySequence::new(Modifiers::CTRL, "AAB", Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(!seq.register('A', Modifiers::CTRL, t0));
        assert!(!seq.register('A', Modifiers::CTRL, ms(t0, 10)));
        assert!(!seq.register('A', Modifiers::CTRL, ms(t0, 20)));
        assert!(!seq.register('A', Modifiers::CTRL, ms(t0, 30)));
        assert!(seq.register('B', Modifiers::CTRL, ms(t0, 40)));
    }

    #[test]
    fn repeated_prefix_survives_an_extra_key() {
        let t0 = Instant::now();
        let typed = |sequence: &str, input: &str| {
            let mut seq = KeySequence::new(Modifiers::CTRL, sequence, Duration::from_secs(5));
            input
                .chars()
                .enumerate()
                .map(|(i, c)| seq.register(c, Modifiers::CTRL, ms(t0, i as u64 * 10)))
                .collect::<Vec<_>>()
        };

        assert_eq!(typed("AAB", "AAAB"), [false, false, false, true]);
        assert_eq!(typed("ABAC", "ABABAC"), [false, false, false, false, false, true]);
        assert_eq!(typed("ADMIN", "ADADMIN").last(), Some(&true));
        assert_eq!(typed("AAB", "AAXB"), [false, false, false, false]);
    }

    #[test]
    fn prefix_function_of_repeating_sequences() {
        assert_eq!(prefix_function(&['A', 'A', 'B']), [0, 1, 0]);
        assert_eq!(prefix_function(&['A', 'B', 'A', 'B', 'C']), [0, 0, 1, 2, 0]);
        assert!(prefix_function(&[]).is_empty());
    }

    #[test]
    fn matcher_ignores_visible_taps_and_disabled_sequence() {
        let config = InputPatternConfig {
            sequence_enabled: false,
            ..Default::default()
        };
        let mut matcher = InputPatternMatcher::new(&config);
        let t0 = Instant::now();

        for i in 0..10 {
            let tap = InputEvent::Tap { hidden_region: false, at: ms(t0, i * 10) };
            assert_eq!(matcher.handle(&tap), None);
        }
        for (i, c) in "ADMIN".chars().enumerate() {
            let key = InputEvent::Key {
                key: c,
                modifiers: Modifiers::CTRL | Modifiers::SHIFT,
                at: ms(t0, i as u64 * 10),
            };
            assert_eq!(matcher.handle(&key), None);
        }
    }

    #[test]
    fn modifier_names_parse() {
        assert_eq!(
            Modifiers::from_names(["Ctrl", "shift"]),
            Some(Modifiers::CTRL | Modifiers::SHIFT)
        );
        assert_eq!(Modifiers::from_names(["hyper"]), None);
    }
}
