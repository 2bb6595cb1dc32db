use serde::{Deserialize, Serialize};

/// Logical trigger sources, each bound to one fixed bit of the output word.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Periodic,
    InputEdge,
    AudioOnset,
}

impl Channel {
    /// Number of channels in use. Slots `COUNT..width` of a word are reserved.
    pub const COUNT: usize = 3;

    pub const ALL: [Channel; Channel::COUNT] =
        [Channel::Periodic, Channel::InputEdge, Channel::AudioOnset];

    /// Bit position in the output word.
    pub fn index(&self) -> usize {
        match self {
            Channel::Periodic => 0,
            Channel::InputEdge => 1,
            Channel::AudioOnset => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short cause label written to the trigger log.
    pub fn label(&self) -> &'static str {
        match self {
            Channel::Periodic => "interval",
            Channel::InputEdge => "input",
            Channel::AudioOnset => "sound",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-channel pulse hold, in frames after the triggering frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldFrames {
    pub periodic: u64,
    pub input_edge: u64,
    pub audio_onset: u64,
}

impl HoldFrames {
    pub fn uniform(frames: u64) -> Self {
        Self {
            periodic: frames,
            input_edge: frames,
            audio_onset: frames,
        }
    }

    pub fn get(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Periodic => self.periodic,
            Channel::InputEdge => self.input_edge,
            Channel::AudioOnset => self.audio_onset,
        }
    }

    pub fn set(&mut self, channel: Channel, frames: u64) {
        match channel {
            Channel::Periodic => self.periodic = frames,
            Channel::InputEdge => self.input_edge = frames,
            Channel::AudioOnset => self.audio_onset = frames,
        }
    }

    pub(crate) fn as_array(&self) -> [u64; Channel::COUNT] {
        let mut out = [0; Channel::COUNT];
        for channel in Channel::ALL {
            out[channel.index()] = self.get(channel);
        }
        out
    }
}

impl Default for HoldFrames {
    fn default() -> Self {
        Self::uniform(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_stable_and_distinct() {
        let indices: Vec<usize> = Channel::ALL.iter().map(Channel::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for channel in Channel::ALL {
            assert_eq!(Channel::from_index(channel.index()), Some(channel));
        }
        assert_eq!(Channel::from_index(Channel::COUNT), None);
    }

    #[test]
    fn hold_frames_deserialize_with_partial_table() {
        let hold: HoldFrames = serde_json::from_str(r#"{"input_edge": 4}"#).unwrap();
        assert_eq!(hold.periodic, 1);
        assert_eq!(hold.input_edge, 4);
        assert_eq!(hold.audio_onset, 1);
        assert_eq!(hold.as_array(), [1, 4, 1]);
    }
}
