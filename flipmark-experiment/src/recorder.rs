use crate::RunError;
use flipmark_core::{Channel, EventRecord, TriggerWord};
use std::collections::BTreeSet;

/// Append-only trigger log, strictly ordered by frame.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    records: Vec<EventRecord>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        frame: u64,
        next_flip: f64,
        word: TriggerWord,
        causes: Vec<Channel>,
    ) -> Result<&EventRecord, RunError> {
        if let Some(last) = self.records.last() {
            if frame <= last.frame {
                return Err(RunError::OutOfOrder {
                    last: last.frame,
                    frame,
                });
            }
        }
        self.records.push(EventRecord {
            frame,
            next_flip,
            word,
            causes,
        });
        Ok(&self.records[self.records.len() - 1])
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EventRecord> {
        self.records.last()
    }

    /// Frames that produced a record.
    pub fn frames(&self) -> BTreeSet<u64> {
        self.records.iter().map(|r| r.frame).collect()
    }

    /// Frames on which at least one source fired.
    pub fn onset_frames(&self) -> BTreeSet<u64> {
        self.records
            .iter()
            .filter(|r| r.is_onset())
            .map(|r| r.frame)
            .collect()
    }

    /// Keeps the rows of a per-frame table whose frame produced a record.
    pub fn retain_recorded<T>(
        &self,
        rows: impl IntoIterator<Item = T>,
        frame_of: impl Fn(&T) -> u64,
    ) -> Vec<T> {
        let frames = self.frames();
        rows.into_iter()
            .filter(|row| frames.contains(&frame_of(row)))
            .collect()
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}
