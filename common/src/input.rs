use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::driver::{Delay, InputLine};

/// Accepts a new level only after it has been read `stable_samples` times in
/// a row.
#[derive(Debug, Clone)]
pub struct Debouncer {
    stable: bool,
    candidate: bool,
    streak: u8,
    stable_samples: u8,
}

impl Debouncer {
    pub fn new(initial: bool, stable_samples: u8) -> Self {
        Self {
            stable: initial,
            candidate: initial,
            streak: 0,
            stable_samples: stable_samples.max(1),
        }
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    /// Feeds one raw sample; returns the new stable level when it changes.
    pub fn update(&mut self, raw: bool) -> Option<bool> {
        if raw == self.stable {
            self.candidate = raw;
            self.streak = 0;
            return None;
        }

        if raw != self.candidate {
            self.candidate = raw;
            self.streak = 0;
        }

        self.streak = self.streak.saturating_add(1);
        if self.streak >= self.stable_samples {
            self.stable = raw;
            self.streak = 0;
            Some(raw)
        } else {
            None
        }
    }
}

/// Debounced button level shared between the sampler thread (writer) and the
/// connectivity loop (reader).
#[derive(Debug, Clone)]
pub struct SampledLevel {
    level: Arc<AtomicBool>,
}

impl SampledLevel {
    pub fn new(initial: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(initial)),
        }
    }

    pub fn store(&self, level: bool) {
        self.level.store(level, Ordering::SeqCst);
    }

    pub fn load(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl InputLine for SampledLevel {
    fn read_line(&mut self) -> bool {
        self.load()
    }
}

/// Samples a raw line at a fixed period and keeps `output` at its debounced
/// level. Each call handles one sample so targets can wrap it in their own
/// thread loop.
pub struct InputSampler<R, D> {
    raw: R,
    delay: D,
    debouncer: Debouncer,
    output: SampledLevel,
    interval_ms: u64,
}

impl<R: InputLine, D: Delay> InputSampler<R, D> {
    pub fn new(
        raw: R,
        delay: D,
        output: SampledLevel,
        interval_ms: u64,
        stable_samples: u8,
    ) -> Self {
        let initial = output.load();
        Self {
            raw,
            delay,
            debouncer: Debouncer::new(initial, stable_samples),
            output,
            interval_ms,
        }
    }

    pub fn sample_once(&mut self) -> Option<bool> {
        let changed = self.debouncer.update(self.raw.read_line());
        if let Some(level) = changed {
            self.output.store(level);
        }
        self.delay.delay_ms(self.interval_ms);
        changed
    }

    pub fn run(mut self) -> ! {
        loop {
            self.sample_once();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{RecordingDelay, ScriptedInput};

    #[test]
    fn ignores_short_glitches() {
        let mut debouncer = Debouncer::new(false, 3);

        assert_eq!(debouncer.update(true), None);
        assert_eq!(debouncer.update(true), None);
        assert_eq!(debouncer.update(false), None);
        assert_eq!(debouncer.update(true), None);
        assert!(!debouncer.stable());
    }

    #[test]
    fn accepts_level_after_streak() {
        let mut debouncer = Debouncer::new(false, 3);

        assert_eq!(debouncer.update(true), None);
        assert_eq!(debouncer.update(true), None);
        assert_eq!(debouncer.update(true), Some(true));
        assert_eq!(debouncer.update(true), None);
        assert!(debouncer.stable());
    }

    #[test]
    fn single_sample_threshold_follows_input() {
        let mut debouncer = Debouncer::new(false, 0);
        assert_eq!(debouncer.update(true), Some(true));
        assert_eq!(debouncer.update(false), Some(false));
    }

    #[test]
    fn sampler_publishes_debounced_level() {
        let output = SampledLevel::new(false);
        let mut reader = output.clone();
        let mut sampler = InputSampler::new(
            ScriptedInput::new(&[true, false, true, true, false]),
            RecordingDelay::default(),
            output,
            20,
            2,
        );

        let changes: Vec<Option<bool>> = (0..5).map(|_| sampler.sample_once()).collect();

        assert_eq!(changes, vec![None, None, None, Some(true), None]);
        assert!(reader.read_line());
        assert_eq!(sampler.delay.sleeps, vec![20; 5]);
    }
}
