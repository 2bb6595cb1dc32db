use crate::{Channel, CoreError, EdgeDetector};

/// Per-frame view handed to trigger sources. Built fresh every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub frame: u64,
    pub refresh_rate: f64,
    /// Predicted timestamp of the upcoming flip, in display-clock seconds.
    pub next_flip: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub channel: Channel,
    pub fired: bool,
}

/// The closed set of trigger sources evaluated once per frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSource {
    /// Fires every `every_frames` frames, starting at frame 0.
    Periodic { every_frames: u64 },
    /// Fires every `period_frames` frames; a sound onset accompanies each pulse.
    AudioOnset { period_frames: u64, period_secs: f64 },
    /// Fires on the press edge of the polled input.
    InputEdge(EdgeDetector),
}

impl TriggerSource {
    pub fn periodic(every_frames: u64) -> Result<Self, CoreError> {
        if every_frames == 0 {
            return Err(CoreError::ZeroInterval);
        }
        Ok(Self::Periodic { every_frames })
    }

    /// Period is `floor(refresh_rate * period_secs)` frames.
    pub fn audio_onset(refresh_rate: f64, period_secs: f64) -> Result<Self, CoreError> {
        if !refresh_rate.is_finite() || refresh_rate <= 0.0 {
            return Err(CoreError::InvalidRefreshRate(refresh_rate));
        }
        let frames = (refresh_rate * period_secs).floor();
        if !frames.is_finite() || frames < 1.0 {
            return Err(CoreError::AudioPeriodTooShort {
                period_secs,
                refresh_rate,
            });
        }
        Ok(Self::AudioOnset {
            period_frames: frames as u64,
            period_secs,
        })
    }

    pub fn input_edge() -> Self {
        Self::InputEdge(EdgeDetector::new())
    }

    pub fn channel(&self) -> Channel {
        match self {
            TriggerSource::Periodic { .. } => Channel::Periodic,
            TriggerSource::AudioOnset { .. } => Channel::AudioOnset,
            TriggerSource::InputEdge(_) => Channel::InputEdge,
        }
    }

    /// Evaluates the source for this frame. `pressed` is the raw input level,
    /// ignored by the frame-count sources.
    pub fn evaluate(&mut self, ctx: &FrameContext, pressed: bool) -> TriggerEvent {
        let fired = match self {
            TriggerSource::Periodic { every_frames } => ctx.frame % *every_frames == 0,
            TriggerSource::AudioOnset { period_frames, .. } => ctx.frame % *period_frames == 0,
            TriggerSource::InputEdge(edge) => edge.poll(pressed),
        };
        TriggerEvent {
            channel: self.channel(),
            fired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(frame: u64) -> FrameContext {
        FrameContext {
            frame,
            refresh_rate: 60.0,
            next_flip: frame as f64 / 60.0,
        }
    }

    #[test]
    fn periodic_fires_on_multiples() {
        let mut src = TriggerSource::periodic(100).unwrap();
        let fired: Vec<u64> = (0..250)
            .filter(|f| src.evaluate(&ctx(*f), false).fired)
            .collect();
        assert_eq!(fired, vec![0, 100, 200]);
        assert_eq!(src.channel(), Channel::Periodic);
    }

    #[test]
    fn audio_period_floors_frames() {
        let src = TriggerSource::audio_onset(59.94, 2.0).unwrap();
        assert!(matches!(
            src,
            TriggerSource::AudioOnset {
                period_frames: 119,
                ..
            }
        ));
        assert_eq!(
            TriggerSource::audio_onset(60.0, 0.01),
            Err(CoreError::AudioPeriodTooShort {
                period_secs: 0.01,
                refresh_rate: 60.0
            })
        );
        assert!(TriggerSource::audio_onset(f64::NAN, 2.0).is_err());
        assert_eq!(TriggerSource::periodic(0), Err(CoreError::ZeroInterval));
    }

    #[test]
    fn input_edge_ignores_frame_index() {
        let mut src = TriggerSource::input_edge();
        assert!(src.evaluate(&ctx(3), true).fired);
        assert!(!src.evaluate(&ctx(4), true).fired);
        assert!(!src.evaluate(&ctx(5), false).fired);
        let event = src.evaluate(&ctx(6), true);
        assert_eq!(
            event,
            TriggerEvent {
                channel: Channel::InputEdge,
                fired: true
            }
        );
    }
}
