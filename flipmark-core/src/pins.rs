use crate::{Channel, CoreError, HoldFrames, TriggerWord};

/// Result of [`PinState::update`].
#[derive(Debug, Clone, PartialEq)]
pub struct PinUpdate {
    pub changed: bool,
    pub word: TriggerWord,
    /// Channels whose pulse expired on this update.
    pub cleared: Vec<Channel>,
}

/// Output word model with one pulse timer per channel.
///
/// A channel's bit is high iff its start marker is set and
/// `frame - start <= hold`. Reserved slots above [`Channel::COUNT`] stay low.
#[derive(Debug, Clone)]
pub struct PinState {
    hold: [u64; Channel::COUNT],
    started_at: [Option<u64>; Channel::COUNT],
    blank: TriggerWord,
    last: TriggerWord,
}

impl PinState {
    pub fn new(width: usize, hold: HoldFrames) -> Result<Self, CoreError> {
        let blank = TriggerWord::zero(width)?;
        Ok(Self {
            hold: hold.as_array(),
            started_at: [None; Channel::COUNT],
            blank,
            last: blank,
        })
    }

    /// Arms (or re-arms) the channel's pulse at `frame`.
    pub fn trigger(&mut self, channel: Channel, frame: u64) {
        self.started_at[channel.index()] = Some(frame);
    }

    /// Expires stale pulses and recomposes the word.
    pub fn update(&mut self, frame: u64) -> PinUpdate {
        let mut cleared = Vec::new();
        for channel in Channel::ALL {
            let slot = channel.index();
            if let Some(start) = self.started_at[slot] {
                if frame.saturating_sub(start) > self.hold[slot] {
                    self.started_at[slot] = None;
                    cleared.push(channel);
                }
            }
        }

        let word = self.compose();
        let changed = word != self.last;
        self.last = word;
        PinUpdate {
            changed,
            word,
            cleared,
        }
    }

    /// Drops every marker. Returns true if the last word was non-zero.
    pub fn reset(&mut self) -> bool {
        self.started_at = [None; Channel::COUNT];
        let was_set = !self.last.is_zero();
        self.last = self.blank;
        was_set
    }

    /// Word as of the last update.
    pub fn word(&self) -> TriggerWord {
        self.last
    }

    pub fn width(&self) -> usize {
        self.blank.width()
    }

    pub fn is_active(&self, channel: Channel) -> bool {
        self.started_at[channel.index()].is_some()
    }

    pub fn any_active(&self) -> bool {
        self.started_at.iter().any(Option::is_some)
    }

    fn compose(&self) -> TriggerWord {
        Channel::ALL
            .into_iter()
            .filter(|c| self.started_at[c.index()].is_some())
            .fold(self.blank, TriggerWord::with_channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins(hold: u64) -> PinState {
        PinState::new(8, HoldFrames::uniform(hold)).unwrap()
    }

    #[test]
    fn pulse_stays_high_for_hold_frames_after_trigger() {
        let mut pins = pins(3);
        pins.trigger(Channel::Periodic, 10);
        let mut high = Vec::new();
        for frame in 10..20 {
            high.push(pins.update(frame).word.channel(Channel::Periodic));
        }
        // frames 10..=13 high, then low
        assert_eq!(&high[..4], &[true; 4]);
        assert!(high[4..].iter().all(|h| !h));
    }

    #[test]
    fn retrigger_restarts_the_count() {
        let mut pins = pins(1);
        pins.trigger(Channel::InputEdge, 0);
        assert!(pins.update(0).changed);
        assert!(!pins.update(1).changed);
        pins.trigger(Channel::InputEdge, 2);
        let up = pins.update(2);
        assert!(!up.changed);
        assert!(up.word.channel(Channel::InputEdge));
        assert!(pins.update(3).word.channel(Channel::InputEdge));
        let down = pins.update(4);
        assert!(down.changed);
        assert_eq!(down.cleared, vec![Channel::InputEdge]);
        assert!(down.word.is_zero());
    }

    #[test]
    fn update_is_idempotent_for_the_same_frame() {
        let mut pins = pins(1);
        pins.trigger(Channel::AudioOnset, 5);
        let first = pins.update(7);
        let second = pins.update(7);
        assert!(first.word.is_zero());
        assert_eq!(second.word, first.word);
        assert!(!second.changed);
        assert!(second.cleared.is_empty());
    }

    #[test]
    fn channels_time_out_independently() {
        let mut hold = HoldFrames::uniform(1);
        hold.set(Channel::AudioOnset, 4);
        let mut pins = PinState::new(8, hold).unwrap();
        pins.trigger(Channel::Periodic, 0);
        pins.trigger(Channel::AudioOnset, 0);
        assert_eq!(pins.update(0).word.value(), 0b101);
        assert_eq!(pins.update(2).word.value(), 0b100);
        assert!(pins.is_active(Channel::AudioOnset));
        assert_eq!(pins.update(4).word.value(), 0b100);
        assert!(pins.update(5).word.is_zero());
        assert!(!pins.any_active());
    }

    #[test]
    fn reserved_slots_stay_low() {
        let mut pins = pins(1);
        for channel in Channel::ALL {
            pins.trigger(channel, 0);
        }
        let word = pins.update(0).word;
        assert!(word.bits()[Channel::COUNT..].iter().all(|b| !b));
        assert_eq!(word.value(), 0b111);
    }

    #[test]
    fn reset_reports_whether_pins_were_high() {
        let mut pins = pins(1);
        assert!(!pins.reset());
        pins.trigger(Channel::Periodic, 0);
        pins.update(0);
        assert!(pins.reset());
        assert!(pins.word().is_zero());
        assert!(!pins.any_active());
    }
}
