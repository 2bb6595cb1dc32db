use crate::{Channel, TriggerWord};
use serde::{Deserialize, Serialize};

/// One trigger-log row: the word applied at the flip following `frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub frame: u64,
    pub next_flip: f64,
    pub word: TriggerWord,
    /// Sources that fired on this frame. Empty for clear-only records.
    pub causes: Vec<Channel>,
}

impl EventRecord {
    pub fn is_onset(&self) -> bool {
        !self.causes.is_empty()
    }

    /// Cause labels joined with `+`, e.g. `interval+sound`.
    pub fn cause_label(&self) -> String {
        self.causes
            .iter()
            .map(Channel::label)
            .collect::<Vec<_>>()
            .join("+")
    }
}
