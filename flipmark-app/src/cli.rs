use anyhow::{Context, Result};
use clap::Parser;
use flipmark_experiment::{PortSpec, RunConfig};
use flipmark_render::Corner;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Frame-locked trigger timing test")]
pub struct Args {
    /// List available audio devices (speakers and microphones) and exit
    #[arg(long, short = 'l')]
    pub list_devices: bool,

    /// Index of the speaker device, as printed by --list-devices
    #[arg(long, short = 's')]
    pub speaker: Option<usize>,

    /// Volume of the tone, 0.0 to 1.0
    #[arg(long, short = 'v', default_value_t = 0.5)]
    pub speaker_volume: f32,

    /// Sample rate of the speaker stream
    #[arg(long, short = 'r', default_value_t = 44_100)]
    pub speaker_sample_rate: u32,

    /// Index of the microphone device; enables recording
    #[arg(long, short = 'm')]
    pub microphone: Option<usize>,

    #[arg(long, short = 'c', default_value_t = 1)]
    pub microphone_channels: u16,

    #[arg(long, short = 'z', default_value_t = 44_100)]
    pub microphone_sample_rate: u32,

    /// Number of frames to run (overrides config)
    #[arg(long, short = 'n')]
    pub num_iter: Option<u64>,

    /// Periodic trigger interval in frames (overrides config)
    #[arg(long, short = 't')]
    pub trigger_every: Option<u64>,

    /// Output port: memory, parallel[:ADDR], ADDR or serial:PATH[@BAUD]
    #[arg(long, short = 'p', default_value = "parallel:0x378")]
    pub port: PortSpec,

    /// Screen resolution as WIDTH,HEIGHT
    #[arg(long, short = 'x', default_value = "2560,1440", value_parser = parse_resolution)]
    pub screen_res: (u32, u32),

    /// Output directory for trigger logs and recordings
    #[arg(long, short = 'o', default_value = "data")]
    pub out_dir: PathBuf,

    /// Corner of the photodiode marker: tl, tr, bl or br
    #[arg(long, short = 'd', default_value = "br")]
    pub photodiode_location: Corner,

    /// Path to a TOML run config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run without a window on a virtual display
    #[arg(long)]
    pub headless: bool,

    /// Refresh rate of the virtual display, or skip measurement in a window
    #[arg(long)]
    pub refresh_rate: Option<f64>,

    /// Press probability per frame for the simulated input (headless only)
    #[arg(long, default_value_t = 0.0)]
    pub random_input: f64,

    /// Disable the periodic sound
    #[arg(long)]
    pub no_sound: bool,
}

impl Args {
    /// Config file values with command-line overrides applied.
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => RunConfig::default(),
        };
        if let Some(n) = self.num_iter {
            config.num_frames = n;
        }
        if let Some(every) = self.trigger_every {
            config.trigger_every = every;
        }
        if self.no_sound {
            config.sound_enabled = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(',')
        .ok_or_else(|| format!("expected WIDTH,HEIGHT, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid dimension '{v}': {e}"))
    };
    Ok((parse(w)?, parse(h)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_bench_setup() {
        let args = Args::parse_from(["flipmark"]);
        assert_eq!(args.port, PortSpec::default());
        assert_eq!(args.screen_res, (2560, 1440));
        assert_eq!(args.photodiode_location, Corner::BottomRight);
        let config = args.run_config().unwrap();
        assert_eq!(config.num_frames, 10_000);
        assert_eq!(config.trigger_every, 100);
    }

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, "num_frames = 500\ntrigger_every = 20\n").unwrap();
        let args = Args::parse_from([
            "flipmark",
            "--config",
            path.to_str().unwrap(),
            "-t",
            "50",
            "--no-sound",
            "-p",
            "serial:/dev/ttyUSB0@115200",
            "-d",
            "tl",
        ]);
        let config = args.run_config().unwrap();
        assert_eq!(config.num_frames, 500);
        assert_eq!(config.trigger_every, 50);
        assert!(!config.sound_enabled);
        assert_eq!(
            args.port,
            PortSpec::Serial {
                path: "/dev/ttyUSB0".into(),
                baud: 115_200
            }
        );
        assert_eq!(args.photodiode_location, Corner::TopLeft);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Args::try_parse_from(["flipmark", "-x", "2560"]).is_err());
        assert!(Args::try_parse_from(["flipmark", "-d", "middle"]).is_err());
        let args = Args::parse_from(["flipmark", "-t", "0"]);
        assert!(args.run_config().is_err());
    }
}
