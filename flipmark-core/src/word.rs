use crate::{Channel, CoreError};
use serde::{Deserialize, Serialize};

/// Fixed-width digital output word. Bit `i` drives output pin `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerWord {
    value: u32,
    width: u8,
}

impl TriggerWord {
    pub const MIN_WIDTH: usize = Channel::COUNT;
    pub const MAX_WIDTH: usize = 32;

    /// All-zero word of the given width.
    pub fn zero(width: usize) -> Result<Self, CoreError> {
        if !(Self::MIN_WIDTH..=Self::MAX_WIDTH).contains(&width) {
            return Err(CoreError::InvalidWordWidth {
                width,
                min: Self::MIN_WIDTH,
                max: Self::MAX_WIDTH,
            });
        }
        Ok(Self {
            value: 0,
            width: width as u8,
        })
    }

    pub fn width(&self) -> usize {
        self.width as usize
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Low byte, as written to byte-wide ports.
    pub fn low_byte(&self) -> u8 {
        (self.value & 0xff) as u8
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.width() && self.value & (1 << index) != 0
    }

    pub fn channel(&self, channel: Channel) -> bool {
        self.bit(channel.index())
    }

    /// Pins in port order, pin 0 first.
    pub fn bits(&self) -> Vec<bool> {
        (0..self.width()).map(|i| self.bit(i)).collect()
    }

    pub(crate) fn with_channel(mut self, channel: Channel) -> Self {
        self.value |= 1 << channel.index();
        self
    }

    /// Channels whose bits are set.
    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.channel(*c))
            .collect()
    }
}

impl std::fmt::Display for TriggerWord {
    /// Most significant pin first, zero padded to the word width.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$b}", self.value, width = self.width())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_widths_that_cannot_hold_all_channels() {
        assert!(matches!(
            TriggerWord::zero(2),
            Err(CoreError::InvalidWordWidth { width: 2, .. })
        ));
        assert!(TriggerWord::zero(33).is_err());
        assert!(TriggerWord::zero(3).is_ok());
        assert!(TriggerWord::zero(32).is_ok());
    }

    #[test]
    fn channel_bits_map_to_pins() {
        let word = TriggerWord::zero(8)
            .unwrap()
            .with_channel(Channel::Periodic)
            .with_channel(Channel::AudioOnset);
        assert_eq!(word.value(), 0b101);
        assert_eq!(word.low_byte(), 5);
        assert_eq!(
            word.bits(),
            vec![true, false, true, false, false, false, false, false]
        );
        assert_eq!(word.channels(), vec![Channel::Periodic, Channel::AudioOnset]);
        assert_eq!(word.to_string(), "00000101");
        assert!(!word.bit(8));
    }
}
