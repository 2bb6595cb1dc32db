/// Quadratic ease-in/ease-out motion along one axis, advanced one frame at a
/// time. Bidirectional cycles go out in the first half and back in the second.
#[derive(Debug, Clone, PartialEq)]
pub struct EaseInOut {
    pub start: f32,
    pub end: f32,
    pub duration: f32,
    pub repeat: bool,
    pub bidirectional: bool,
    t: f32,
    finished: bool,
}

impl EaseInOut {
    pub fn new(start: f32, end: f32, duration: f32) -> Self {
        Self {
            start,
            end,
            duration: duration.max(f32::EPSILON),
            repeat: true,
            bidirectional: true,
            t: 0.0,
            finished: false,
        }
    }

    pub fn once(mut self) -> Self {
        self.repeat = false;
        self
    }

    pub fn one_way(mut self) -> Self {
        self.bidirectional = false;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Position at the current time.
    pub fn position(&self) -> f32 {
        if self.finished {
            return if self.bidirectional { self.start } else { self.end };
        }
        if self.bidirectional {
            let half = self.duration / 2.0;
            if self.t < half {
                ease(self.t, self.start, self.end, half)
            } else {
                ease(self.t - half, self.end, self.start, half)
            }
        } else {
            ease(self.t, self.start, self.end, self.duration)
        }
    }

    /// Returns the position for this frame, then advances by `dt` seconds.
    pub fn step(&mut self, dt: f32) -> f32 {
        if self.t >= self.duration {
            if self.repeat {
                self.t = 0.0;
            } else {
                self.finished = true;
            }
        }
        let pos = self.position();
        if !self.finished {
            self.t += dt;
        }
        pos
    }

    pub fn reset(&mut self) {
        self.t = 0.0;
        self.finished = false;
    }
}

fn ease(t: f32, from: f32, to: f32, d: f32) -> f32 {
    let span = to - from;
    let t = t / (d / 2.0);
    if t < 1.0 {
        span / 2.0 * t * t + from
    } else {
        let t = t - 1.0;
        -span / 2.0 * (t * (t - 2.0) - 1.0) + from
    }
}
