use crate::RunOutcome;
use anyhow::{Context, Result};
use flipmark_experiment::{
    AudioOut, CancelToken, OutputPort, RunConfig, RunError, TriggerScheduler,
};
use flipmark_render::{SceneConfig, SkiaRenderer};
use flipmark_timing::{HighPrecisionTimer, RefreshEstimate, RefreshEstimator, Timer};
use pixels::{Pixels, PixelsBuilder, SurfaceTexture};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

/// Left mouse button as the raw input device. A click that starts and ends
/// between two frames still reads as pressed on the next poll.
#[derive(Debug, Default)]
struct InputLatch {
    down: bool,
    clicked: bool,
}

impl InputLatch {
    fn set(&mut self, pressed: bool) {
        self.down = pressed;
        if pressed {
            self.clicked = true;
        }
    }

    fn poll(&mut self) -> bool {
        let pressed = self.down || self.clicked;
        self.clicked = false;
        pressed
    }
}

enum Stage {
    Measuring(RefreshEstimator),
    Running(TriggerScheduler),
    Done,
}

pub struct App {
    config: RunConfig,
    scene: SceneConfig,
    buffer_size: (u32, u32),
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SkiaRenderer>,
    timer: HighPrecisionTimer,
    stage: Stage,
    port: Box<dyn OutputPort>,
    audio: Box<dyn AudioOut>,
    cancel: CancelToken,
    input: InputLatch,
    last_flip: f64,
    display_name: String,
    outcome: Option<RunOutcome>,
    error: Option<anyhow::Error>,
}

impl App {
    /// `refresh_rate` skips measurement when given.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RunConfig,
        scene: SceneConfig,
        buffer_size: (u32, u32),
        refresh_rate: Option<f64>,
        timer: HighPrecisionTimer,
        port: Box<dyn OutputPort>,
        audio: Box<dyn AudioOut>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let mut app = Self {
            config,
            scene,
            buffer_size,
            window: None,
            pixels: None,
            renderer: None,
            timer,
            stage: Stage::Measuring(RefreshEstimator::new()),
            port,
            audio,
            cancel,
            input: InputLatch::default(),
            last_flip: 0.0,
            display_name: String::new(),
            outcome: None,
            error: None,
        };
        if let Some(rate) = refresh_rate {
            tracing::info!(rate_hz = rate, "refresh rate given, skipping measurement");
            app.start_run(Some(rate))?;
        }
        Ok(app)
    }

    /// Blocks until the run finishes or is cancelled. Errors raised after
    /// the frame loop started come back in [`RunOutcome::aborted`].
    pub fn run(mut self) -> Result<RunOutcome> {
        let event_loop = EventLoop::new()?;
        println!("Platform: {}", std::env::consts::OS);
        println!("Click the left mouse button to send input triggers, ESC to stop.\n");

        event_loop.run_app(&mut self)?;
        self.take_outcome()
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .context("no monitor available")?;
        let nominal = monitor
            .refresh_rate_millihertz()
            .map(|mhz| mhz as f64 / 1000.0);
        self.display_name = monitor.name().unwrap_or_else(|| "unnamed monitor".into());

        let attributes = Window::default_attributes()
            .with_title("flipmark")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
            .with_resizable(false);
        let window = Arc::new(event_loop.create_window(attributes)?);
        let physical = window.inner_size();

        tracing::info!(
            monitor = %self.display_name,
            width = physical.width,
            height = physical.height,
            scale_factor = window.scale_factor(),
            nominal_rate_hz = ?nominal,
            "window created"
        );

        let (w, h) = self.buffer_size;
        if (physical.width, physical.height) != (w, h) {
            tracing::warn!(
                window = ?(physical.width, physical.height),
                buffer = ?(w, h),
                "screen resolution differs from the window, frames are scaled"
            );
        }
        let surface = SurfaceTexture::new(physical.width, physical.height, window.clone());
        self.pixels = Some(PixelsBuilder::new(w, h, surface).enable_vsync(true).build()?);

        let mut renderer = SkiaRenderer::new(w, h, self.scene.clone())?;
        if let Stage::Running(scheduler) = &self.stage {
            renderer.set_refresh_rate(scheduler.refresh_rate());
        } else if let Some(rate) = nominal {
            renderer.set_refresh_rate(rate);
        }
        self.renderer = Some(renderer);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn start_run(&mut self, refresh_rate: Option<f64>) -> Result<()> {
        let scheduler = match TriggerScheduler::new(self.config.clone(), refresh_rate) {
            Ok(s) => s,
            Err(RunError::RefreshRateUnknown) => {
                return Err(RunError::RefreshRateUnknown)
                    .context("display flips never settled, cannot derive frame cadences");
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_refresh_rate(scheduler.refresh_rate());
        }
        self.last_flip = self.timer.seconds();
        self.stage = Stage::Running(scheduler);
        Ok(())
    }

    /// One vsync-locked frame while the refresh rate is being measured.
    fn measure_step(&mut self) -> Result<()> {
        let pixels = self.pixels.as_mut().context("surface not ready")?;
        let renderer = self.renderer.as_mut().context("renderer not ready")?;
        renderer.render_frame(false, pixels.frame_mut(), &mut self.timer)?;
        pixels.render()?;
        let flip_ns = self.timer.now();

        let Stage::Measuring(estimator) = &mut self.stage else {
            return Ok(());
        };
        match estimator.observe_flip(flip_ns) {
            RefreshEstimate::Pending => Ok(()),
            RefreshEstimate::Measured(rate) => {
                tracing::info!(rate_hz = rate, "refresh rate measured");
                self.start_run(Some(rate))
            }
            RefreshEstimate::Unknown => self.start_run(None),
        }
    }

    /// One scheduler frame: evaluate, draw, present, then apply the write.
    fn run_step(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Stage::Running(scheduler) = &mut self.stage else {
            return Ok(());
        };
        if self.cancel.is_cancelled() {
            scheduler.cancel();
        }
        if self.cancel.is_cancelled() || scheduler.is_complete() {
            return self.finish(event_loop);
        }

        let next_flip = self.last_flip + 1.0 / scheduler.refresh_rate();
        let pressed = self.input.poll();
        let decision = scheduler.begin_frame(next_flip, pressed, &mut *self.audio)?;

        let pixels = self.pixels.as_mut().context("surface not ready")?;
        let renderer = self.renderer.as_mut().context("renderer not ready")?;
        let stats = renderer.render_frame(decision.marker(), pixels.frame_mut(), &mut self.timer)?;
        pixels.render()?;
        let flip = self.timer.seconds();
        self.last_flip = flip;

        // failures are counted and logged by the scheduler
        let _ = scheduler.complete_flip(&mut *self.port, flip);

        let late = flip - next_flip;
        if late > 0.5 / scheduler.refresh_rate() {
            tracing::warn!(
                frame = decision.frame,
                late_ms = late * 1e3,
                draw_ms = stats.total.as_secs_f64() * 1e3,
                "flip later than predicted"
            );
        }
        Ok(())
    }

    fn finish(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let closed = self.close_run();
        self.cleanup_and_exit(event_loop);
        closed
    }

    /// Drains the port and keeps the scheduler as the run outcome.
    fn close_run(&mut self) -> Result<()> {
        let stage = std::mem::replace(&mut self.stage, Stage::Done);
        if let Stage::Running(mut scheduler) = stage {
            let summary = scheduler.finish(&mut *self.port, self.timer.seconds())?;
            self.outcome = Some(RunOutcome {
                refresh_rate: scheduler.refresh_rate(),
                display: self.display_name.clone(),
                screen_res: Some(self.buffer_size),
                summary,
                scheduler,
                aborted: None,
            });
        }
        Ok(())
    }

    /// Ends the event loop on an error.
    fn fail(&mut self, err: anyhow::Error, event_loop: &ActiveEventLoop) {
        self.abort(err);
        self.cleanup_and_exit(event_loop);
    }

    /// Drains a started run and attaches `err` to its outcome, so records
    /// gathered so far still reach the trigger log.
    fn abort(&mut self, err: anyhow::Error) {
        tracing::error!(error = %format!("{err:#}"), "aborting run");
        let running = matches!(self.stage, Stage::Running(_));
        match self.close_run() {
            Ok(()) if running => {
                if let Some(outcome) = self.outcome.as_mut() {
                    outcome.aborted = Some(err);
                }
            }
            Ok(()) => self.error = Some(err),
            Err(drain) => {
                tracing::error!(error = %format!("{drain:#}"), "failed to drain after abort");
                self.error = Some(err);
            }
        }
    }

    fn take_outcome(&mut self) -> Result<RunOutcome> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.outcome
            .take()
            .context("window closed before the trigger run started")
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                tracing::error!(error = %e, "failed to resize surface");
            }
        }
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.fail(e.context("failed to create window and surface"), event_loop);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.cancel.cancel();
                if let Stage::Running(scheduler) = &mut self.stage {
                    scheduler.cancel();
                }
                if let Err(e) = self.finish(event_loop) {
                    self.fail(e, event_loop);
                }
            }
            WindowEvent::RedrawRequested => {
                let step = match self.stage {
                    Stage::Measuring(_) => self.measure_step(),
                    Stage::Running(_) => self.run_step(event_loop),
                    Stage::Done => Ok(()),
                };
                if let Err(e) = step {
                    self.fail(e, event_loop);
                } else if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.input.set(state == ElementState::Pressed),
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    tracing::info!("escape pressed");
                    if matches!(self.stage, Stage::Measuring(_)) {
                        self.stage = Stage::Done;
                        self.cleanup_and_exit(event_loop);
                    } else {
                        self.cancel.cancel();
                    }
                }
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    let size = window.inner_size();
                    self.handle_resize(size);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if matches!(self.stage, Stage::Done) && self.window.is_some() {
            event_loop.exit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flipmark_experiment::MemoryPort;
    use flipmark_experiment::sim::NullAudio;

    fn app(refresh_rate: Option<f64>) -> App {
        let config = RunConfig {
            num_frames: 100,
            trigger_every: 50,
            sound_enabled: false,
            ..RunConfig::default()
        };
        App::new(
            config,
            SceneConfig::default(),
            (64, 36),
            refresh_rate,
            HighPrecisionTimer::new(),
            Box::new(MemoryPort::new(8)),
            Box::new(NullAudio),
            CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn error_mid_run_keeps_the_records() {
        let mut app = app(Some(60.0));
        let Stage::Running(scheduler) = &mut app.stage else {
            panic!("run should start without measuring");
        };
        scheduler.begin_frame(0.5, false, &mut NullAudio).unwrap();
        scheduler.complete_flip(&mut *app.port, 0.5).unwrap();
        // frame 1 is evaluated but its flip never happens
        scheduler.begin_frame(0.5 + 1.0 / 60.0, false, &mut NullAudio).unwrap();

        app.abort(anyhow::anyhow!("surface lost"));
        assert!(matches!(app.stage, Stage::Done));

        let outcome = app.take_outcome().unwrap();
        let err = outcome.aborted.as_ref().unwrap();
        assert_eq!(err.to_string(), "surface lost");
        assert_eq!(outcome.summary.frames_run, 2);
        assert_eq!(outcome.summary.final_word.map(|w| w.value()), Some(0));

        let records = outcome.scheduler.recorder().records();
        assert_eq!(records[0].frame, 0);
        // the frame-0 pulse was still high, so the drain is logged after it
        let drain = records.last().unwrap();
        assert_eq!(drain.frame, 2);
        assert!(drain.word.is_zero());
        assert!(drain.next_flip > records[0].next_flip);
    }

    #[test]
    fn error_before_the_run_is_returned() {
        let mut app = app(None);
        app.abort(anyhow::anyhow!("no monitor available"));
        let err = app.take_outcome().err().unwrap();
        assert_eq!(err.to_string(), "no monitor available");
    }

    #[test]
    fn short_click_reads_as_one_press() {
        let mut input = InputLatch::default();
        input.set(true);
        input.set(false);
        assert!(input.poll());
        assert!(!input.poll());
    }

    #[test]
    fn held_button_stays_pressed() {
        let mut input = InputLatch::default();
        input.set(true);
        assert!(input.poll());
        assert!(input.poll());
        input.set(false);
        assert!(!input.poll());
    }
}
