use log::{error, info};

use crate::{
    driver::{Delay, InputLine, OutputLine},
    state::ConnectivityState,
    types::FailureKind,
};

/// A burst of `toggles` level flips spaced `toggle_ms` apart, followed by the
/// idle level for `rest_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub toggle_ms: u64,
    pub toggles: u32,
    pub rest_ms: u64,
}

impl BlinkPattern {
    pub fn cycle_ms(&self) -> u64 {
        self.toggle_ms
            .saturating_mul(u64::from(self.toggles))
            .saturating_add(self.rest_ms)
    }
}

/// LED line with a configurable active level.
pub struct Led<O> {
    line: O,
    active_low: bool,
}

impl<O: OutputLine> Led<O> {
    pub fn new(line: O, active_low: bool) -> Self {
        let mut led = Self { line, active_low };
        led.set(false);
        led
    }

    pub fn set(&mut self, lit: bool) {
        self.line.write_line(lit != self.active_low);
    }
}

/// Plays one cycle of `pattern`, starting from the unlit state.
pub fn play_pattern<O: OutputLine, D: Delay>(
    led: &mut Led<O>,
    delay: &mut D,
    pattern: BlinkPattern,
) {
    let mut lit = false;
    for _ in 0..pattern.toggles {
        delay.delay_ms(pattern.toggle_ms);
        lit = !lit;
        led.set(lit);
    }
    led.set(false);
    delay.delay_ms(pattern.rest_ms);
}

/// Flashes the status LED once for every successful publish.
pub struct PublishPulser<O, D> {
    led: Led<O>,
    delay: D,
    pulse_ms: u64,
}

impl<O: OutputLine, D: Delay> PublishPulser<O, D> {
    pub fn new(led: Led<O>, delay: D, pulse_ms: u64) -> Self {
        Self {
            led,
            delay,
            pulse_ms,
        }
    }

    pub fn signal_publish_ok(&mut self) {
        self.led.set(true);
        self.delay.delay_ms(self.pulse_ms);
        self.led.set(false);
    }

    /// Consumes the pending notification, pulsing if one was set.
    pub fn service(&mut self, state: &ConnectivityState) -> bool {
        if state.take_pending_notify() {
            self.signal_publish_ok();
            true
        } else {
            false
        }
    }

    pub fn run(mut self, state: &ConnectivityState, idle_ms: u64) -> ! {
        loop {
            if !self.service(state) {
                self.delay.delay_ms(idle_ms);
            }
        }
    }
}

/// Door-open alarm: once the button has stayed at its released level for
/// `alarm_after_ms`, blinks the LED until the button is pressed again.
pub struct DoorAlarm<I, O, D> {
    level: I,
    led: Led<O>,
    delay: D,
    released_level: bool,
    alarm_after_ms: u64,
    blink_ms: u64,
    open_for_ms: u64,
}

impl<I: InputLine, O: OutputLine, D: Delay> DoorAlarm<I, O, D> {
    pub fn new(
        level: I,
        led: Led<O>,
        delay: D,
        released_level: bool,
        alarm_after_ms: u64,
        blink_ms: u64,
    ) -> Self {
        Self {
            level,
            led,
            delay,
            released_level,
            alarm_after_ms,
            blink_ms,
            open_for_ms: 0,
        }
    }

    /// Runs one blink period. Returns whether the alarm blinked.
    pub fn step(&mut self) -> bool {
        if self.level.read_line() != self.released_level {
            self.open_for_ms = 0;
            self.delay.delay_ms(self.blink_ms);
            return false;
        }

        if self.open_for_ms < self.alarm_after_ms {
            self.open_for_ms = self.open_for_ms.saturating_add(self.blink_ms);
            self.delay.delay_ms(self.blink_ms);
            return false;
        }

        self.led.set(true);
        self.delay.delay_ms(self.blink_ms);
        self.led.set(false);
        self.delay.delay_ms(self.blink_ms);
        true
    }

    pub fn run(mut self) -> ! {
        info!("door alarm armed: blinking after {}ms released", self.alarm_after_ms);
        loop {
            self.step();
        }
    }
}

/// Terminal indicator. Entering a failure mode never returns; the device
/// stays in it until reset.
pub struct FailureIndicator<O, D> {
    led: Led<O>,
    delay: D,
}

impl<O: OutputLine, D: Delay> FailureIndicator<O, D> {
    pub fn new(led: Led<O>, delay: D) -> Self {
        Self { led, delay }
    }

    pub fn enter_failure_mode(mut self, kind: FailureKind, pattern: BlinkPattern) -> ! {
        error!(
            "entering failure mode {} ({} toggles every {}ms)",
            kind.as_str(),
            pattern.toggles,
            pattern.toggle_ms
        );
        loop {
            play_pattern(&mut self.led, &mut self.delay, pattern);
        }
    }
}
