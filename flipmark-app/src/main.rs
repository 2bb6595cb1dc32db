mod app;
mod audio;
mod cli;
mod headless;
mod logging;

use anyhow::{Context, Result};
use app::App;
use audio::{MicRecorder, ToneOutput, ToneSpec};
use clap::Parser;
use cli::Args;
use flipmark_experiment::sim::NullAudio;
use flipmark_experiment::{
    AudioOut, CancelToken, RunMetadata, RunSummary, TriggerLog, TriggerScheduler,
};
use flipmark_render::SceneConfig;
use flipmark_timing::{HighPrecisionTimer, TimerResolutionGuard};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A finished run, ready to be written out.
pub struct RunOutcome {
    pub scheduler: TriggerScheduler,
    pub summary: RunSummary,
    pub refresh_rate: f64,
    pub display: String,
    pub screen_res: Option<(u32, u32)>,
    /// Error that cut the run short after its first frame.
    pub aborted: Option<anyhow::Error>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.list_devices {
        return audio::list_devices();
    }

    let config = args.run_config()?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let log_path = logging::init(&args.out_dir)?;
    tracing::info!(
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        log = %log_path.display(),
        ?config,
        "flipmark starting"
    );

    let _resolution = TimerResolutionGuard::acquire();
    let started_unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let timer = HighPrecisionTimer::new();

    let port = args
        .port
        .open(config.word_width)
        .with_context(|| format!("failed to open output port {}", args.port))?;
    let port_name = port.describe();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("failed to set Ctrl-C handler")?;
    }

    let mut devices = BTreeMap::new();
    let audio: Box<dyn AudioOut> = if config.sound_enabled {
        let tone = ToneOutput::open(
            args.speaker,
            args.speaker_sample_rate,
            ToneSpec {
                volume: args.speaker_volume.clamp(0.0, 1.0),
                ..ToneSpec::default()
            },
            timer.clone(),
        )
        .context("failed to open speaker")?;
        devices.insert("speaker".to_string(), tone.device().to_string());
        Box::new(tone)
    } else {
        Box::new(NullAudio)
    };
    let mic = match args.microphone {
        Some(index) => {
            let mic = MicRecorder::start(
                Some(index),
                args.microphone_channels,
                args.microphone_sample_rate,
                &args.out_dir,
                timer.clone(),
            )
            .context("failed to start microphone")?;
            devices.insert("microphone".to_string(), mic.device().to_string());
            Some(mic)
        }
        None => None,
    };

    let outcome = if args.headless {
        let (mut audio, mut port) = (audio, port);
        headless::run(
            config.clone(),
            args.refresh_rate,
            args.random_input,
            timer,
            &mut *audio,
            &mut *port,
            &cancel,
        )
    } else {
        let scene = SceneConfig {
            marker_corner: args.photodiode_location,
            ..SceneConfig::default()
        };
        App::new(
            config.clone(),
            scene,
            args.screen_res,
            args.refresh_rate,
            timer,
            port,
            audio,
            cancel,
        )
        .and_then(App::run)
    };

    // the recording is finalised whatever happened to the run
    if let Some(mic) = mic {
        match mic.finish() {
            Ok(recording) => {
                devices.insert("recording".to_string(), recording.path.display().to_string());
                if let Some(t) = recording.first_sample_secs {
                    devices.insert("recording_start_secs".to_string(), format!("{t:.6}"));
                }
            }
            Err(err) => tracing::error!(error = %format!("{err:#}"), "microphone recording incomplete"),
        }
    }
    let mut outcome = outcome?;
    devices.insert("display".to_string(), outcome.display.clone());

    let mut metadata =
        RunMetadata::new(&config, outcome.refresh_rate, &outcome.summary, port_name);
    metadata.devices = devices;
    metadata.screen_res = outcome.screen_res;
    metadata.photodiode_corner =
        (!args.headless).then(|| args.photodiode_location.code().to_string());
    metadata.started_unix_secs = started_unix_secs;
    metadata.error = outcome.aborted.as_ref().map(|err| format!("{err:#}"));

    let log = TriggerLog {
        metadata,
        records: outcome.scheduler.into_recorder().into_records(),
    };
    let paths = log.write_to_dir(&args.out_dir, "triggers")?;

    println!(
        "\n{} frames at {:.2} Hz{}, {} records, {} failed writes",
        outcome.summary.frames_run,
        outcome.refresh_rate,
        if outcome.summary.cancelled { " (cancelled)" } else { "" },
        outcome.summary.records,
        outcome.summary.write_failures,
    );
    println!("Trigger log: {}", paths.csv.display());
    match outcome.aborted.take() {
        Some(err) => Err(err.context("trigger run aborted")),
        None => Ok(()),
    }
}
