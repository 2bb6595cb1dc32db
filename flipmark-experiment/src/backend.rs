//! Collaborator seams around the scheduler: display, audio, output port and
//! raw input. Timestamps are seconds on the display clock.

use crate::PortError;
use flipmark_core::TriggerWord;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub trait Display {
    /// `None` when the rate cannot be determined.
    fn refresh_rate(&mut self) -> Option<f64>;
    /// Predicted timestamp of the upcoming flip.
    fn next_flip_time(&self) -> f64;
    /// Draws the stimulus for `frame`, with the photodiode marker if `marker`.
    fn draw(&mut self, frame: u64, marker: bool);
    /// Blocks until vsync and returns the actual flip timestamp.
    fn flip(&mut self) -> f64;
}

pub trait AudioOut {
    fn schedule_onset_at(&mut self, when: f64);
}

pub trait OutputPort {
    /// Applies the whole word at once.
    fn write_word(&mut self, word: TriggerWord) -> Result<(), PortError>;
    fn describe(&self) -> String;
}

pub trait InputDevice {
    fn is_pressed(&mut self) -> bool;
}

impl<T: OutputPort + ?Sized> OutputPort for Box<T> {
    fn write_word(&mut self, word: TriggerWord) -> Result<(), PortError> {
        (**self).write_word(word)
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<T: AudioOut + ?Sized> AudioOut for Box<T> {
    fn schedule_onset_at(&mut self, when: f64) {
        (**self).schedule_onset_at(when)
    }
}

impl<T: InputDevice + ?Sized> InputDevice for Box<T> {
    fn is_pressed(&mut self) -> bool {
        (**self).is_pressed()
    }
}

/// The collaborators driven by [`TriggerScheduler::run`](crate::TriggerScheduler::run).
pub struct Rig<'a> {
    pub display: &'a mut dyn Display,
    pub audio: &'a mut dyn AudioOut,
    pub port: &'a mut dyn OutputPort,
    pub input: &'a mut dyn InputDevice,
}

/// Cooperative cancellation flag, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
