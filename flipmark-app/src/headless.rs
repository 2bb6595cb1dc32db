use crate::RunOutcome;
use anyhow::Result;
use flipmark_experiment::sim::{NoInput, RandomInput, VirtualDisplay};
use flipmark_experiment::{
    AudioOut, CancelToken, Display, InputDevice, OutputPort, Rig, RunConfig, TriggerScheduler,
};
use flipmark_timing::HighPrecisionTimer;

pub const DEFAULT_RATE: f64 = 60.0;
/// Longest simulated button hold, in frames.
const MAX_HOLD_FRAMES: u64 = 10;

/// Runs the scheduler against a virtual display paced on the run clock.
pub fn run(
    config: RunConfig,
    refresh_rate: Option<f64>,
    press_probability: f64,
    timer: HighPrecisionTimer,
    audio: &mut dyn AudioOut,
    port: &mut dyn OutputPort,
    cancel: &CancelToken,
) -> Result<RunOutcome> {
    let rate = refresh_rate.unwrap_or(DEFAULT_RATE);
    let mut display = VirtualDisplay::paced(rate, timer);
    let mut scheduler = TriggerScheduler::new(config, display.refresh_rate())?;

    let mut input: Box<dyn InputDevice> = if press_probability > 0.0 {
        Box::new(RandomInput::new(
            rand::rng(),
            press_probability,
            MAX_HOLD_FRAMES,
        ))
    } else {
        Box::new(NoInput)
    };

    tracing::info!(rate_hz = rate, "headless run on a virtual display");
    let result = {
        let mut rig = Rig {
            display: &mut display,
            audio,
            port: &mut *port,
            input: &mut input,
        };
        scheduler.run(&mut rig, cancel)
    };
    let (summary, aborted) = match result {
        Ok(summary) => (summary, None),
        Err(err) => {
            tracing::error!(error = %err, "aborting run");
            let summary = scheduler.finish(port, display.next_flip_time())?;
            (summary, Some(anyhow::Error::from(err)))
        }
    };
    let flips = display.flips();
    let marker_frames = display.marker_frames().len();
    tracing::info!(
        flips,
        marker_frames,
        "virtual display closed"
    );

    Ok(RunOutcome {
        refresh_rate: scheduler.refresh_rate(),
        display: format!("virtual {rate:.3} Hz"),
        screen_res: None,
        summary,
        scheduler,
        aborted,
    })
}
