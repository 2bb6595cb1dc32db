use crate::RunError;
use flipmark_core::{HoldFrames, TriggerWord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Which frames produce a trigger-log record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordPolicy {
    /// Every frame whose word changed, pulse clears included, plus every
    /// frame on which a source fired.
    #[default]
    Changes,
    /// Only frames on which at least one source fired.
    Onsets,
}

/// Everything the scheduler needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub num_frames: u64,
    /// Periodic trigger interval in frames.
    pub trigger_every: u64,
    pub sound_enabled: bool,
    pub sound_every_secs: f64,
    /// Extra delay of the sound onset after the flip it is scheduled on.
    pub audio_delay_secs: f64,
    pub input_enabled: bool,
    pub word_width: usize,
    pub hold: HoldFrames,
    pub record_policy: RecordPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_frames: 10_000,
            trigger_every: 100,
            sound_enabled: true,
            sound_every_secs: 2.0,
            audio_delay_secs: 0.0,
            input_enabled: true,
            word_width: 8,
            hold: HoldFrames::default(),
            record_policy: RecordPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: RunConfig = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn sound_period(&self) -> Option<f64> {
        self.sound_enabled.then_some(self.sound_every_secs)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        TriggerWord::zero(self.word_width)?;
        if self.trigger_every == 0 {
            return Err(RunError::InvalidConfig(
                "trigger_every must be at least 1 frame".into(),
            ));
        }
        if self.sound_enabled
            && !(self.sound_every_secs.is_finite() && self.sound_every_secs > 0.0)
        {
            return Err(RunError::InvalidConfig(format!(
                "sound_every_secs must be positive, got {}",
                self.sound_every_secs
            )));
        }
        if !(self.audio_delay_secs.is_finite() && self.audio_delay_secs >= 0.0) {
            return Err(RunError::InvalidConfig(format!(
                "audio_delay_secs must be non-negative, got {}",
                self.audio_delay_secs
            )));
        }
        Ok(())
    }
}
