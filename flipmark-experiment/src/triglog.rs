//! Trigger log persistence: one CSV row per record plus a JSON metadata
//! sidecar. Existing files are never overwritten.

use crate::config::{RecordPolicy, RunConfig};
use crate::error::RunError;
use crate::scheduler::RunSummary;
use flipmark_core::{EventRecord, HoldFrames};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Highest numeric suffix tried before giving up on a file name.
pub const MAX_SUFFIX: u32 = 9999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub refresh_rate: f64,
    pub num_frames: u64,
    pub frames_run: u64,
    pub cancelled: bool,
    pub write_failures: u64,
    pub trigger_every: u64,
    pub sound_every_secs: Option<f64>,
    pub audio_delay_secs: f64,
    pub word_width: usize,
    pub hold: HoldFrames,
    pub record_policy: RecordPolicy,
    pub port: String,
    /// Free-form device identifiers, e.g. `speaker`, `microphone`, `display`.
    pub devices: BTreeMap<String, String>,
    pub screen_res: Option<(u32, u32)>,
    pub photodiode_corner: Option<String>,
    pub started_unix_secs: u64,
    /// Set when the run was aborted by an error after the frame loop started.
    #[serde(default)]
    pub error: Option<String>,
}

impl RunMetadata {
    pub fn new(config: &RunConfig, refresh_rate: f64, summary: &RunSummary, port: String) -> Self {
        Self {
            refresh_rate,
            num_frames: config.num_frames,
            frames_run: summary.frames_run,
            cancelled: summary.cancelled,
            write_failures: summary.write_failures,
            trigger_every: config.trigger_every,
            sound_every_secs: config.sound_period(),
            audio_delay_secs: config.audio_delay_secs,
            word_width: config.word_width,
            hold: config.hold,
            record_policy: config.record_policy,
            port,
            devices: BTreeMap::new(),
            screen_res: None,
            photodiode_corner: None,
            started_unix_secs: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogPaths {
    pub csv: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerLog {
    pub metadata: RunMetadata,
    pub records: Vec<EventRecord>,
}

impl TriggerLog {
    /// Writes `<stem>.csv` and `<stem>.json` into `dir`, suffixing the stem
    /// with `_1`, `_2`, ... until neither file exists.
    pub fn write_to_dir(&self, dir: &Path, stem: &str) -> Result<LogPaths, RunError> {
        std::fs::create_dir_all(dir)?;
        let (csv_file, csv) = create_unique(dir, stem, &["csv", "json"])?;
        let metadata = csv.with_extension("json");
        let json_file = create_new(&metadata)?;

        self.write_csv(csv_file)?;
        serde_json::to_writer_pretty(json_file, &self.metadata)?;

        tracing::info!(
            csv = %csv.display(),
            metadata = %metadata.display(),
            records = self.records.len(),
            "trigger log saved"
        );
        Ok(LogPaths { csv, metadata })
    }

    /// Columns: `frame, next_flip, word, pin0 .. pinN-1, causes`.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<(), RunError> {
        let width = self.metadata.word_width;
        let mut writer = csv::Writer::from_writer(out);

        let mut header = vec!["frame".to_string(), "next_flip".into(), "word".into()];
        header.extend((0..width).map(|pin| format!("pin{pin}")));
        header.push("causes".into());
        writer.write_record(&header)?;

        for record in &self.records {
            let mut row = vec![
                record.frame.to_string(),
                format!("{:.6}", record.next_flip),
                record.word.value().to_string(),
            ];
            row.extend(
                (0..width).map(|pin| u8::from(record.word.bit(pin)).to_string()),
            );
            row.push(record.cause_label());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Picks the first free `<stem>[_n].<ext>` path, checking every extension in
/// `exts`, and creates the file for the first one.
pub fn create_unique(dir: &Path, stem: &str, exts: &[&str]) -> Result<(File, PathBuf), RunError> {
    let first_ext = exts.first().copied().unwrap_or("");
    for n in 0..=MAX_SUFFIX {
        let candidate = if n == 0 {
            stem.to_string()
        } else {
            format!("{stem}_{n}")
        };
        let taken = exts
            .iter()
            .any(|ext| dir.join(format!("{candidate}.{ext}")).exists());
        if taken {
            continue;
        }
        let path = dir.join(format!("{candidate}.{first_ext}"));
        match create_new(&path) {
            Ok(file) => return Ok((file, path)),
            // lost a race with another writer
            Err(RunError::Io(err)) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(RunError::NoFreeFilename(
        dir.join(format!("{stem}.{first_ext}")),
    ))
}

fn create_new(path: &Path) -> Result<File, RunError> {
    Ok(OpenOptions::new().write(true).create_new(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipmark_core::{Channel, TriggerWord};

    fn log() -> TriggerLog {
        let config = RunConfig::default();
        let summary = RunSummary {
            frames_run: 3,
            cancelled: false,
            write_failures: 0,
            records: 2,
            final_word: None,
        };
        let word = TriggerWord::zero(8).unwrap();
        TriggerLog {
            metadata: RunMetadata::new(&config, 60.0, &summary, "memory".into()),
            records: vec![
                EventRecord {
                    frame: 0,
                    next_flip: 0.016667,
                    word,
                    causes: vec![Channel::Periodic, Channel::AudioOnset],
                },
                EventRecord {
                    frame: 2,
                    next_flip: 0.05,
                    word,
                    causes: vec![],
                },
            ],
        }
    }

    #[test]
    fn csv_has_one_column_per_pin() {
        let mut out = Vec::new();
        log().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "frame,next_flip,word,pin0,pin1,pin2,pin3,pin4,pin5,pin6,pin7,causes"
        );
        assert_eq!(lines[1], "0,0.016667,0,0,0,0,0,0,0,0,0,interval+sound");
        assert_eq!(lines[2], "2,0.050000,0,0,0,0,0,0,0,0,0,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn existing_logs_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = log().write_to_dir(dir.path(), "triggers").unwrap();
        let second = log().write_to_dir(dir.path(), "triggers").unwrap();
        assert_eq!(first.csv, dir.path().join("triggers.csv"));
        assert_eq!(second.csv, dir.path().join("triggers_1.csv"));
        assert_eq!(second.metadata, dir.path().join("triggers_1.json"));

        // a stray sidecar also blocks the stem
        std::fs::write(dir.path().join("triggers_2.json"), "{}").unwrap();
        let third = log().write_to_dir(dir.path(), "triggers").unwrap();
        assert_eq!(third.csv, dir.path().join("triggers_3.csv"));

        let meta: RunMetadata =
            serde_json::from_reader(File::open(&first.metadata).unwrap()).unwrap();
        assert_eq!(meta, log().metadata);
    }
}
