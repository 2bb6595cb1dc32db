use crate::backend::{AudioOut, CancelToken, OutputPort, Rig};
use crate::config::{RecordPolicy, RunConfig};
use crate::error::{PortError, RunError};
use crate::recorder::EventRecorder;
use flipmark_core::{Channel, CoreError, FrameContext, PinState, TriggerSource, TriggerWord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Between frames, nothing staged.
    Idle,
    /// A word is staged for the upcoming flip.
    Writing,
    /// Issuing the final all-zero write.
    Draining,
    Finished,
}

/// What the scheduler decided for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecision {
    pub frame: u64,
    pub next_flip: f64,
    /// Sources that fired, in channel order.
    pub fired: Vec<Channel>,
    /// Word staged for the upcoming flip, if it changed.
    pub word: Option<TriggerWord>,
    pub audio_onset: Option<f64>,
}

impl FrameDecision {
    /// The photodiode marker is shown on every frame a source fired.
    pub fn marker(&self) -> bool {
        !self.fired.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    frame: u64,
    word: TriggerWord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_run: u64,
    pub cancelled: bool,
    pub write_failures: u64,
    pub records: usize,
    /// Word applied by the drain write, or `None` if that write failed.
    pub final_word: Option<TriggerWord>,
}

/// Frame-synchronised trigger scheduler.
///
/// Each frame: evaluate sources, arm pins, decay pins, and if the word
/// changed stage it for the upcoming flip. At most one write is pending at a
/// time; it is applied by [`complete_flip`](Self::complete_flip) right after
/// the flip returns.
pub struct TriggerScheduler {
    config: RunConfig,
    refresh_rate: f64,
    sources: Vec<TriggerSource>,
    pins: PinState,
    recorder: EventRecorder,
    pending: Option<PendingWrite>,
    next_frame: u64,
    last_flip: f64,
    state: SchedulerState,
    write_failures: u64,
    cancelled: bool,
}

impl TriggerScheduler {
    /// Fails if the refresh rate is unknown, since frame cadences derive from it.
    pub fn new(config: RunConfig, refresh_rate: Option<f64>) -> Result<Self, RunError> {
        config.validate()?;
        let refresh_rate = match refresh_rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => rate,
            Some(rate) => return Err(CoreError::InvalidRefreshRate(rate).into()),
            None => return Err(RunError::RefreshRateUnknown),
        };

        let mut sources = vec![TriggerSource::periodic(config.trigger_every)?];
        if config.input_enabled {
            sources.push(TriggerSource::input_edge());
        }
        if let Some(period) = config.sound_period() {
            sources.push(TriggerSource::audio_onset(refresh_rate, period)?);
        }
        let pins = PinState::new(config.word_width, config.hold)?;

        tracing::info!(
            refresh_rate,
            num_frames = config.num_frames,
            trigger_every = config.trigger_every,
            sound_every_secs = ?config.sound_period(),
            word_width = config.word_width,
            "trigger scheduler ready"
        );

        Ok(Self {
            config,
            refresh_rate,
            sources,
            pins,
            recorder: EventRecorder::new(),
            pending: None,
            next_frame: 0,
            last_flip: 0.0,
            state: SchedulerState::Idle,
            write_failures: 0,
            cancelled: false,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn refresh_rate(&self) -> f64 {
        self.refresh_rate
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn into_recorder(self) -> EventRecorder {
        self.recorder
    }

    /// Current word as of the last evaluated frame.
    pub fn word(&self) -> TriggerWord {
        self.pins.word()
    }

    pub fn frames_run(&self) -> u64 {
        self.next_frame
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    pub fn is_complete(&self) -> bool {
        self.next_frame >= self.config.num_frames
    }

    /// Word staged for the upcoming flip.
    pub fn pending_word(&self) -> Option<TriggerWord> {
        self.pending.map(|p| p.word)
    }

    /// Evaluates the next frame and stages its write. Audio onsets are handed
    /// to `audio` immediately, timed to `next_flip`.
    pub fn begin_frame(
        &mut self,
        next_flip: f64,
        pressed: bool,
        audio: &mut dyn AudioOut,
    ) -> Result<FrameDecision, RunError> {
        if matches!(self.state, SchedulerState::Draining | SchedulerState::Finished) {
            return Err(RunError::Finished);
        }
        let frame = self.next_frame;
        if let Some(pending) = self.pending {
            return Err(RunError::FlipPending {
                frame,
                pending: pending.frame,
            });
        }

        let ctx = FrameContext {
            frame,
            refresh_rate: self.refresh_rate,
            next_flip,
        };
        let mut fired: Vec<Channel> = self
            .sources
            .iter_mut()
            .map(|source| source.evaluate(&ctx, pressed))
            .filter(|event| event.fired)
            .map(|event| event.channel)
            .collect();
        fired.sort_by_key(Channel::index);

        for channel in &fired {
            self.pins.trigger(*channel, frame);
            tracing::debug!(frame, next_flip, %channel, "pin high scheduled");
        }

        let mut audio_onset = None;
        if fired.contains(&Channel::AudioOnset) {
            let when = next_flip + self.config.audio_delay_secs;
            audio.schedule_onset_at(when);
            audio_onset = Some(when);
        }

        let update = self.pins.update(frame);
        for channel in &update.cleared {
            tracing::debug!(frame, next_flip, %channel, "pin low scheduled");
        }

        let record = match self.config.record_policy {
            RecordPolicy::Changes => update.changed || !fired.is_empty(),
            RecordPolicy::Onsets => !fired.is_empty(),
        };
        if record {
            self.recorder
                .record(frame, next_flip, update.word, fired.clone())?;
        }

        let word = if update.changed {
            self.pending = Some(PendingWrite {
                frame,
                word: update.word,
            });
            self.state = SchedulerState::Writing;
            tracing::debug!(frame, next_flip, word = %update.word, "write scheduled on flip");
            Some(update.word)
        } else {
            self.state = SchedulerState::Idle;
            None
        };

        self.next_frame += 1;
        Ok(FrameDecision {
            frame,
            next_flip,
            fired,
            word,
            audio_onset,
        })
    }

    /// Applies the staged write at the flip boundary. A failed write is
    /// counted and returned, never retried.
    pub fn complete_flip(
        &mut self,
        port: &mut dyn OutputPort,
        flip_time: f64,
    ) -> Result<Option<TriggerWord>, PortError> {
        self.last_flip = flip_time;
        if self.state == SchedulerState::Writing {
            self.state = SchedulerState::Idle;
        }
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        match port.write_word(pending.word) {
            Ok(()) => Ok(Some(pending.word)),
            Err(err) => {
                self.write_failures += 1;
                tracing::error!(
                    frame = pending.frame,
                    word = %pending.word,
                    error = %err,
                    "port write failed"
                );
                Err(err)
            }
        }
    }

    /// Marks the run as cancelled; the caller still has to [`finish`](Self::finish).
    pub fn cancel(&mut self) {
        if !self.cancelled {
            tracing::info!(frame = self.next_frame, "run cancelled");
        }
        self.cancelled = true;
    }

    /// Predicted time of the flip after the last completed one.
    pub fn predicted_flip(&self) -> f64 {
        self.last_flip + 1.0 / self.refresh_rate
    }

    /// Issues the final all-zero write and ends the run. `drain_time` is the
    /// flip at which the zero word takes effect, logged on the drain record.
    pub fn finish(
        &mut self,
        port: &mut dyn OutputPort,
        drain_time: f64,
    ) -> Result<RunSummary, RunError> {
        if self.state == SchedulerState::Finished {
            return Err(RunError::Finished);
        }
        self.state = SchedulerState::Draining;

        if let Some(stale) = self.pending.take() {
            tracing::warn!(frame = stale.frame, word = %stale.word, "dropping write that missed its flip");
        }

        let was_set = self.pins.reset();
        let zero = self.pins.word();
        let final_word = match port.write_word(zero) {
            Ok(()) => Some(zero),
            Err(err) => {
                self.write_failures += 1;
                tracing::error!(frame = self.next_frame, word = %zero, error = %err, "drain write failed");
                None
            }
        };

        if was_set && self.config.record_policy == RecordPolicy::Changes {
            // never at or before the flip that raised the last word
            let drain_time = if drain_time > self.last_flip {
                drain_time
            } else {
                self.predicted_flip()
            };
            self.recorder
                .record(self.next_frame, drain_time, zero, Vec::new())?;
        }

        self.state = SchedulerState::Finished;
        let summary = RunSummary {
            frames_run: self.next_frame,
            cancelled: self.cancelled,
            write_failures: self.write_failures,
            records: self.recorder.len(),
            final_word,
        };
        tracing::info!(
            frames = summary.frames_run,
            cancelled = summary.cancelled,
            write_failures = summary.write_failures,
            records = summary.records,
            "trigger run finished"
        );
        Ok(summary)
    }

    /// Drives the full loop against a blocking display until `num_frames`
    /// have run or `cancel` fires, then drains.
    pub fn run(&mut self, rig: &mut Rig<'_>, cancel: &CancelToken) -> Result<RunSummary, RunError> {
        while !self.is_complete() {
            if cancel.is_cancelled() {
                self.cancel();
                break;
            }
            let next_flip = rig.display.next_flip_time();
            let pressed = rig.input.is_pressed();
            let decision = self.begin_frame(next_flip, pressed, &mut *rig.audio)?;
            rig.display.draw(decision.frame, decision.marker());
            let flip_time = rig.display.flip();
            // failures are logged and counted by complete_flip
            let _ = self.complete_flip(&mut *rig.port, flip_time);
        }
        let drain_time = rig.display.next_flip_time();
        self.finish(&mut *rig.port, drain_time)
    }
}
