//! cpal tone output and microphone capture on the run clock.

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use flipmark_experiment::AudioOut;
use flipmark_experiment::triglog::create_unique;
use flipmark_timing::HighPrecisionTimer;
use hound::{WavSpec, WavWriter};
use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSpec {
    pub frequency: f32,
    pub duration_secs: f32,
    pub volume: f32,
    /// Linear fade in/out to avoid clicks.
    pub ramp_secs: f32,
}

impl Default for ToneSpec {
    fn default() -> Self {
        // A4, 100 ms
        Self {
            frequency: 440.0,
            duration_secs: 0.1,
            volume: 0.5,
            ramp_secs: 0.005,
        }
    }
}

/// Places tone onsets at run-clock timestamps inside output buffers.
pub struct ToneSynth {
    spec: ToneSpec,
    sample_rate: f64,
    pending: VecDeque<f64>,
    /// Sample index into the current tone.
    playing: Option<u64>,
    late: Arc<AtomicU64>,
}

impl ToneSynth {
    pub fn new(spec: ToneSpec, sample_rate: u32) -> Self {
        Self {
            spec,
            sample_rate: sample_rate as f64,
            pending: VecDeque::new(),
            playing: None,
            late: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Onsets that started more than one sample after their timestamp.
    pub fn late_counter(&self) -> Arc<AtomicU64> {
        self.late.clone()
    }

    pub fn schedule(&mut self, when: f64) {
        self.pending.push_back(when);
    }

    fn tone_len(&self) -> u64 {
        (self.spec.duration_secs as f64 * self.sample_rate).round() as u64
    }

    fn sample_at(&self, pos: u64) -> f32 {
        let len = self.tone_len();
        let ramp = ((self.spec.ramp_secs as f64 * self.sample_rate).round() as u64)
            .min(len / 2)
            .max(1);
        let gain = if pos < ramp {
            pos as f32 / ramp as f32
        } else if pos + ramp > len {
            (len - pos) as f32 / ramp as f32
        } else {
            1.0
        };
        let phase = TAU * self.spec.frequency * (pos as f64 / self.sample_rate) as f32;
        phase.sin() * self.spec.volume * gain
    }

    /// Fills interleaved `out`; `start` is the run-clock time at which the
    /// first frame of `out` reaches the speaker.
    pub fn fill(&mut self, out: &mut [f32], channels: usize, start: f64) {
        let channels = channels.max(1);
        let half_sample = 0.5 / self.sample_rate;
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = start + i as f64 / self.sample_rate;
            while let Some(&when) = self.pending.front() {
                if when > t + half_sample {
                    break;
                }
                self.pending.pop_front();
                if t - when > 2.0 * half_sample {
                    self.late.fetch_add(1, Ordering::Relaxed);
                }
                self.playing = Some(0);
            }

            let value = match self.playing {
                Some(pos) if pos < self.tone_len() => {
                    self.playing = Some(pos + 1);
                    self.sample_at(pos)
                }
                _ => {
                    self.playing = None;
                    0.0
                }
            };
            frame.fill(value);
        }
    }
}

/// Speaker stream playing a short tone at each scheduled onset.
pub struct ToneOutput {
    _stream: cpal::Stream,
    onsets: Sender<f64>,
    late: Arc<AtomicU64>,
    device: String,
}

impl ToneOutput {
    pub fn open(
        device_index: Option<usize>,
        sample_rate: u32,
        spec: ToneSpec,
        timer: HighPrecisionTimer,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(i) => host
                .output_devices()?
                .nth(i)
                .with_context(|| format!("no speaker device #{i}"))?,
            None => host
                .default_output_device()
                .context("no default speaker device")?,
        };
        let name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let supported = device.default_output_config()?;
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let synth = ToneSynth::new(spec, sample_rate);
        let late = synth.late_counter();
        let (tx, rx) = crossbeam_channel::unbounded();
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_tone_stream::<f32>(&device, &config, synth, rx, timer)?,
            SampleFormat::I16 => build_tone_stream::<i16>(&device, &config, synth, rx, timer)?,
            SampleFormat::U16 => build_tone_stream::<u16>(&device, &config, synth, rx, timer)?,
            other => bail!("speaker sample format {other:?} is not supported"),
        };
        tracing::info!(device = %name, sample_rate, channels = config.channels, "speaker opened");

        Ok(Self {
            _stream: stream,
            onsets: tx,
            late,
            device: name,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl AudioOut for ToneOutput {
    fn schedule_onset_at(&mut self, when: f64) {
        if self.onsets.send(when).is_err() {
            tracing::error!(when, "speaker stream is gone, onset dropped");
        }
    }
}

impl Drop for ToneOutput {
    fn drop(&mut self) {
        let late = self.late.load(Ordering::Relaxed);
        if late > 0 {
            tracing::warn!(late, "sound onsets started after their scheduled time");
        }
    }
}

fn build_tone_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut synth: ToneSynth,
    onsets: Receiver<f64>,
    timer: HighPrecisionTimer,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            let latency = ts.playback.duration_since(&ts.callback).unwrap_or_default();
            let start = timer.seconds() + latency.as_secs_f64();
            for when in onsets.try_iter() {
                synth.schedule(when);
            }
            scratch.resize(data.len(), 0.0);
            synth.fill(&mut scratch, channels, start);
            for (out, s) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*s);
            }
        },
        |err| tracing::error!(error = %err, "speaker stream error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

pub struct MicSummary {
    pub path: PathBuf,
    pub samples: u64,
    /// Run-clock time of the first captured sample.
    pub first_sample_secs: Option<f64>,
    pub dropped_blocks: u64,
}

/// Microphone capture to a 16-bit WAV file, written on its own thread.
pub struct MicRecorder {
    stream: cpal::Stream,
    writer: JoinHandle<Result<u64, hound::Error>>,
    path: PathBuf,
    first_sample: Arc<OnceLock<f64>>,
    dropped: Arc<AtomicU64>,
    device: String,
}

impl MicRecorder {
    pub fn start(
        device_index: Option<usize>,
        channels: u16,
        sample_rate: u32,
        out_dir: &Path,
        timer: HighPrecisionTimer,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = match device_index {
            Some(i) => host
                .input_devices()?
                .nth(i)
                .with_context(|| format!("no microphone device #{i}"))?,
            None => host
                .default_input_device()
                .context("no default microphone device")?,
        };
        let name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let format = device.default_input_config()?.sample_format();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (file, path) = create_unique(out_dir, "recording", &["wav"])?;
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(1024);
        let writer = std::thread::Builder::new()
            .name("wav-writer".into())
            .spawn(move || -> Result<u64, hound::Error> {
                let mut wav = WavWriter::new(BufWriter::new(file), spec)?;
                let mut written = 0u64;
                for block in rx {
                    for s in block {
                        wav.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
                        written += 1;
                    }
                }
                wav.finalize()?;
                Ok(written)
            })?;

        let first_sample = Arc::new(OnceLock::new());
        let dropped = Arc::new(AtomicU64::new(0));
        let capture = Capture {
            tx,
            timer,
            first_sample: first_sample.clone(),
            dropped: dropped.clone(),
        };
        let stream = match format {
            SampleFormat::F32 => build_capture_stream::<f32>(&device, &config, capture)?,
            SampleFormat::I16 => build_capture_stream::<i16>(&device, &config, capture)?,
            SampleFormat::U16 => build_capture_stream::<u16>(&device, &config, capture)?,
            other => bail!("microphone sample format {other:?} is not supported"),
        };
        tracing::info!(device = %name, sample_rate, channels, path = %path.display(), "recording microphone");

        Ok(Self {
            stream,
            writer,
            path,
            first_sample,
            dropped,
            device: name,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Stops capture and waits for the WAV file to be finalised.
    pub fn finish(self) -> Result<MicSummary> {
        // dropping the stream closes the channel and ends the writer loop
        drop(self.stream);
        let samples = self
            .writer
            .join()
            .map_err(|_| anyhow!("wav writer thread panicked"))?
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        let summary = MicSummary {
            path: self.path,
            samples,
            first_sample_secs: self.first_sample.get().copied(),
            dropped_blocks: self.dropped.load(Ordering::Relaxed),
        };
        if summary.dropped_blocks > 0 {
            tracing::warn!(blocks = summary.dropped_blocks, "microphone blocks dropped");
        }
        tracing::info!(path = %summary.path.display(), samples, "recording saved");
        Ok(summary)
    }
}

struct Capture {
    tx: Sender<Vec<f32>>,
    timer: HighPrecisionTimer,
    first_sample: Arc<OnceLock<f64>>,
    dropped: Arc<AtomicU64>,
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    capture: Capture,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], info: &cpal::InputCallbackInfo| {
            let ts = info.timestamp();
            let latency = ts.callback.duration_since(&ts.capture).unwrap_or_default();
            capture
                .first_sample
                .get_or_init(|| capture.timer.seconds() - latency.as_secs_f64());
            let block: Vec<f32> = data.iter().map(|s| f32::from_sample(*s)).collect();
            if let Err(TrySendError::Full(_)) = capture.tx.try_send(block) {
                capture.dropped.fetch_add(1, Ordering::Relaxed);
            }
        },
        |err| tracing::error!(error = %err, "microphone stream error"),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// Prints speakers and microphones with the indices `--speaker` and
/// `--microphone` expect.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    println!("Audio host: {}", host.id().name());

    println!("Speakers:");
    for (i, device) in host.output_devices()?.enumerate() {
        let config = device
            .default_output_config()
            .map(|c| describe(c.channels(), c.sample_rate().0, c.sample_format()))
            .unwrap_or_else(|e| format!("no default config: {e}"));
        println!("  [{i}] {} ({config})", device_name(&device));
    }

    println!("Microphones:");
    for (i, device) in host.input_devices()?.enumerate() {
        let config = device
            .default_input_config()
            .map(|c| describe(c.channels(), c.sample_rate().0, c.sample_format()))
            .unwrap_or_else(|e| format!("no default config: {e}"));
        println!("  [{i}] {} ({config})", device_name(&device));
    }
    Ok(())
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "<unnamed>".into())
}

fn describe(channels: u16, sample_rate: u32, format: SampleFormat) -> String {
    format!("{channels} ch, {sample_rate} Hz, {format:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn synth() -> ToneSynth {
        ToneSynth::new(
            ToneSpec {
                frequency: 125.0,
                duration_secs: 0.05,
                volume: 0.5,
                ramp_secs: 0.005,
            },
            RATE,
        )
    }

    #[test]
    fn onset_lands_on_its_sample() {
        let mut s = synth();
        s.schedule(1.020);
        let mut out = vec![0.0f32; 100];
        s.fill(&mut out, 1, 1.0);
        assert!(out[..20].iter().all(|v| *v == 0.0));
        assert!(out[20..70].iter().any(|v| v.abs() > 0.1));
        assert!(out[70..].iter().all(|v| *v == 0.0));
        assert!(out.iter().all(|v| v.abs() <= 0.5 + 1e-6));
        assert_eq!(s.late_counter().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn tone_continues_across_buffers() {
        let mut s = synth();
        s.schedule(0.090);
        let mut first = vec![0.0f32; 100];
        s.fill(&mut first, 1, 0.0);
        let mut second = vec![0.0f32; 100];
        s.fill(&mut second, 1, 0.1);
        assert!(second[..40].iter().any(|v| v.abs() > 0.1));
        assert!(second[40..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn channels_carry_the_same_signal() {
        let mut s = synth();
        s.schedule(0.0);
        let mut out = vec![0.0f32; 40];
        s.fill(&mut out, 2, 0.0);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn missed_onsets_start_late_and_are_counted() {
        let mut s = synth();
        s.schedule(0.5);
        let mut out = vec![0.0f32; 100];
        s.fill(&mut out, 1, 0.6);
        assert!(out[..50].iter().any(|v| v.abs() > 0.1));
        assert_eq!(s.late_counter().load(Ordering::Relaxed), 1);
    }
}
