//! Software stand-ins for the display, input and audio collaborators, used by
//! the headless frontend and by tests.

use crate::backend::{AudioOut, Display, InputDevice};
use flipmark_timing::{HighPrecisionTimer, Timer};
use rand::Rng;
use std::collections::BTreeSet;

/// Display with a fixed vsync period on a virtual or real clock.
#[derive(Debug, Clone)]
pub struct VirtualDisplay {
    reported_rate: Option<f64>,
    period_ns: u64,
    origin_ns: u64,
    flips: u64,
    pacer: Option<HighPrecisionTimer>,
    marker_frames: Vec<u64>,
}

impl VirtualDisplay {
    /// Flips complete instantly on a virtual clock starting at zero.
    /// `rate` of `None` simulates a display whose rate cannot be determined;
    /// its clock still ticks at 60 Hz.
    pub fn instant(rate: Option<f64>) -> Self {
        let nominal = rate.filter(|r| r.is_finite() && *r > 0.0).unwrap_or(60.0);
        Self {
            reported_rate: rate,
            period_ns: (1e9 / nominal).round() as u64,
            origin_ns: 0,
            flips: 0,
            pacer: None,
            marker_frames: Vec::new(),
        }
    }

    /// Flips block until each vsync deadline on `timer`.
    pub fn paced(rate: f64, timer: HighPrecisionTimer) -> Self {
        let origin_ns = timer.now();
        Self {
            origin_ns,
            pacer: Some(timer),
            ..Self::instant(Some(rate))
        }
    }

    pub fn flips(&self) -> u64 {
        self.flips
    }

    /// Frames drawn with the photodiode marker.
    pub fn marker_frames(&self) -> &[u64] {
        &self.marker_frames
    }

    fn flip_ns(&self, n: u64) -> u64 {
        self.origin_ns + n * self.period_ns
    }
}

impl Display for VirtualDisplay {
    fn refresh_rate(&mut self) -> Option<f64> {
        self.reported_rate
    }

    fn next_flip_time(&self) -> f64 {
        HighPrecisionTimer::to_seconds(self.flip_ns(self.flips + 1))
    }

    fn draw(&mut self, frame: u64, marker: bool) {
        if marker {
            self.marker_frames.push(frame);
        }
    }

    fn flip(&mut self) -> f64 {
        self.flips += 1;
        let deadline = self.flip_ns(self.flips);
        if let Some(timer) = &self.pacer {
            timer.sleep_until(deadline);
        }
        HighPrecisionTimer::to_seconds(deadline)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputDevice for NoInput {
    fn is_pressed(&mut self) -> bool {
        false
    }
}

/// Input held down on a fixed set of polls (one poll per frame).
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    pressed: BTreeSet<u64>,
    polls: u64,
}

impl ScriptedInput {
    pub fn pressed_on(frames: impl IntoIterator<Item = u64>) -> Self {
        Self {
            pressed: frames.into_iter().collect(),
            polls: 0,
        }
    }
}

impl InputDevice for ScriptedInput {
    fn is_pressed(&mut self) -> bool {
        let pressed = self.pressed.contains(&self.polls);
        self.polls += 1;
        pressed
    }
}

/// Presses at random, each press held for a few frames.
#[derive(Debug, Clone)]
pub struct RandomInput<R: Rng> {
    rng: R,
    press_probability: f64,
    max_hold: u64,
    remaining: u64,
}

impl<R: Rng> RandomInput<R> {
    pub fn new(rng: R, press_probability: f64, max_hold: u64) -> Self {
        Self {
            rng,
            press_probability: press_probability.clamp(0.0, 1.0),
            max_hold: max_hold.max(1),
            remaining: 0,
        }
    }
}

impl<R: Rng> InputDevice for RandomInput<R> {
    fn is_pressed(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            return true;
        }
        if self.rng.random_bool(self.press_probability) {
            self.remaining = self.rng.random_range(0..self.max_hold);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudio;

impl AudioOut for NullAudio {
    fn schedule_onset_at(&mut self, when: f64) {
        tracing::trace!(when, "sound onset (no audio device)");
    }
}

/// Collects requested onset times.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudio {
    pub onsets: Vec<f64>,
}

impl AudioOut for RecordingAudio {
    fn schedule_onset_at(&mut self, when: f64) {
        self.onsets.push(when);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn virtual_clock_advances_one_period_per_flip() {
        let mut display = VirtualDisplay::instant(Some(100.0));
        assert_eq!(display.refresh_rate(), Some(100.0));
        assert!((display.next_flip_time() - 0.01).abs() < 1e-12);
        let t = display.flip();
        assert!((t - 0.01).abs() < 1e-12);
        assert!((display.next_flip_time() - 0.02).abs() < 1e-12);
        assert_eq!(display.flips(), 1);
    }

    #[test]
    fn unknown_rate_is_reported_as_none() {
        let mut display = VirtualDisplay::instant(None);
        assert_eq!(display.refresh_rate(), None);
        assert!(display.flip() > 0.0);
    }

    #[test]
    fn paced_flips_wait_for_vsync() {
        let timer = HighPrecisionTimer::new();
        let mut display = VirtualDisplay::paced(500.0, timer.clone());
        for _ in 0..5 {
            display.flip();
        }
        // five 2 ms periods
        assert!(timer.now() >= display.origin_ns + 10_000_000);
    }

    #[test]
    fn scripted_input_follows_poll_count() {
        let mut input = ScriptedInput::pressed_on([1, 2]);
        let polled: Vec<bool> = (0..4).map(|_| input.is_pressed()).collect();
        assert_eq!(polled, vec![false, true, true, false]);
    }

    #[test]
    fn random_input_holds_presses() {
        let mut input = RandomInput::new(StdRng::seed_from_u64(7), 1.0, 3);
        assert!((0..20).all(|_| input.is_pressed()));
        let mut never = RandomInput::new(StdRng::seed_from_u64(7), 0.0, 3);
        assert!((0..20).all(|_| !never.is_pressed()));
    }
}
