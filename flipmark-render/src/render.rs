use crate::animation::EaseInOut;
use anyhow::{anyhow, Result};
use flipmark_timing::{HighPrecisionTimer, Timer};
use std::str::FromStr;
use std::time::Duration;
use tiny_skia::{Color, Paint, Pixmap, PixmapPaint, Rect, Transform};

const OPAQUE_BLACK: [u8; 4] = [0, 0, 0, 255];

/// Screen corner holding the photodiode marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl Corner {
    pub fn code(&self) -> &'static str {
        match self {
            Corner::TopLeft => "tl",
            Corner::TopRight => "tr",
            Corner::BottomLeft => "bl",
            Corner::BottomRight => "br",
        }
    }

    /// Top-left pixel of a `size` square tucked into this corner.
    pub fn origin(&self, width: u32, height: u32, size: u32) -> (f32, f32) {
        let right = width.saturating_sub(size) as f32;
        let bottom = height.saturating_sub(size) as f32;
        match self {
            Corner::TopLeft => (0.0, 0.0),
            Corner::TopRight => (right, 0.0),
            Corner::BottomLeft => (0.0, bottom),
            Corner::BottomRight => (right, bottom),
        }
    }
}

impl FromStr for Corner {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tl" => Ok(Corner::TopLeft),
            "tr" => Ok(Corner::TopRight),
            "bl" => Ok(Corner::BottomLeft),
            "br" => Ok(Corner::BottomRight),
            other => Err(anyhow!("unknown corner '{other}', expected tl, tr, bl or br")),
        }
    }
}

impl std::fmt::Display for Corner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub marker_corner: Corner,
    pub marker_size: u32,
    /// Seconds for one out-and-back sweep of the square.
    pub sweep_secs: f32,
    pub refresh_rate: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            marker_corner: Corner::default(),
            marker_size: 100,
            sweep_secs: 5.0,
            refresh_rate: 60.0,
        }
    }
}

pub struct FrameStats {
    pub clear: Duration,
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
    pub dirty_count: usize,
}

/// Draws the bouncing square and the photodiode marker into an RGBA frame
/// buffer, touching only the regions that changed since the last frame.
pub struct SkiaRenderer {
    width: u32,
    height: u32,
    scene: SceneConfig,

    square: Pixmap,
    marker: Pixmap,
    motion: EaseInOut,

    // Rendering state
    canvas: Pixmap,
    dirty_regions: Vec<Rect>,
    first_frame: bool,
}

impl SkiaRenderer {
    pub fn new(width: u32, height: u32, scene: SceneConfig) -> Result<Self> {
        let mut canvas =
            Pixmap::new(width, height).ok_or_else(|| anyhow!("invalid canvas {width}x{height}"))?;
        canvas.fill(Color::from_rgba8(0, 0, 0, 255));

        let square = solid_square((height / 10).max(1))?;
        let marker = solid_square(scene.marker_size.max(1))?;
        let motion = Self::motion_for(width, square.width(), scene.sweep_secs);

        Ok(SkiaRenderer {
            width,
            height,
            scene,
            square,
            marker,
            motion,
            canvas,
            dirty_regions: Vec::with_capacity(4),
            first_frame: true,
        })
    }

    fn motion_for(width: u32, square: u32, sweep_secs: f32) -> EaseInOut {
        // square centre travels from the left edge to the right edge
        let half = square as f32 / 2.0;
        EaseInOut::new(-half, width as f32 - half, sweep_secs)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Animation step per frame is `1 / rate`.
    pub fn set_refresh_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.scene.refresh_rate = rate;
        }
    }

    pub fn marker_origin(&self) -> (f32, f32) {
        self.scene
            .marker_corner
            .origin(self.width, self.height, self.marker.width())
    }

    fn fill_black(&mut self, dirty: &[Rect]) {
        let width = self.width as usize;
        let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(self.canvas.data_mut());
        for rect in dirty {
            let Some((x0, y0, x1, y1)) = clip(rect, self.width, self.height) else {
                continue;
            };
            for y in y0..y1 {
                pixels[y * width + x0..y * width + x1].fill(OPAQUE_BLACK);
            }
        }
    }

    fn copy_dirty_region(&self, dirty: &Rect, frame_buffer: &mut [u8]) {
        let Some((x0, y0, x1, y1)) = clip(dirty, self.width, self.height) else {
            return;
        };
        let row_bytes = self.width as usize * 4;
        let canvas_data = self.canvas.data();
        for row in y0..y1 {
            let start = row * row_bytes + x0 * 4;
            let end = row * row_bytes + x1 * 4;
            frame_buffer[start..end].copy_from_slice(&canvas_data[start..end]);
        }
    }

    fn blit(&mut self, which: Sprite, pos: (f32, f32)) {
        let pixmap = match which {
            Sprite::Square => &self.square,
            Sprite::Marker => &self.marker,
        };
        let (w, h) = (pixmap.width() as f32, pixmap.height() as f32);
        self.canvas.draw_pixmap(
            pos.0.round() as i32,
            pos.1.round() as i32,
            pixmap.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        if let Some(rect) = Rect::from_xywh(pos.0.round(), pos.1.round(), w, h) {
            self.dirty_regions.push(rect);
        }
    }

    /// Renders one frame. `marker` shows the photodiode square.
    pub fn render_frame(
        &mut self,
        marker: bool,
        frame_buffer: &mut [u8],
        timer: &mut HighPrecisionTimer,
    ) -> Result<FrameStats> {
        let expected = self.width as usize * self.height as usize * 4;
        if frame_buffer.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {expected}",
                frame_buffer.len()
            ));
        }
        if self.first_frame {
            self.first_frame = false;
            self.canvas.fill(Color::from_rgba8(0, 0, 0, 255));
            frame_buffer.copy_from_slice(self.canvas.data());
            self.dirty_regions.clear();
        }

        // 1) clear what was drawn last frame
        let old_dirty = std::mem::take(&mut self.dirty_regions);
        let t_clear = {
            let t = timer.now();
            self.fill_black(&old_dirty);
            timer.elapsed(t)
        };

        // 2) draw this frame
        let t_draw = {
            let t = timer.now();
            let dt = (1.0 / self.scene.refresh_rate) as f32;
            let x = self.motion.step(dt);
            let y = (self.height as f32 - self.square.height() as f32) / 2.0;
            self.blit(Sprite::Square, (x, y));
            if marker {
                let origin = self.marker_origin();
                self.blit(Sprite::Marker, origin);
            }
            timer.elapsed(t)
        };

        // 3) present old + new regions
        let mut present = old_dirty;
        present.extend_from_slice(&self.dirty_regions);
        let t_copy = {
            let t = timer.now();
            for rect in &present {
                self.copy_dirty_region(rect, frame_buffer);
            }
            timer.elapsed(t)
        };

        let total = t_clear + t_draw + t_copy;
        timer.record_frame(total);
        Ok(FrameStats {
            clear: t_clear,
            draw: t_draw,
            copy: t_copy,
            total,
            dirty_count: present.len(),
        })
    }
}

#[derive(Clone, Copy)]
enum Sprite {
    Square,
    Marker,
}

fn solid_square(size: u32) -> Result<Pixmap> {
    let mut pm = Pixmap::new(size, size).ok_or_else(|| anyhow!("invalid sprite size {size}"))?;
    let mut paint = Paint::default();
    paint.anti_alias = false;
    paint.set_color(Color::from_rgba8(255, 255, 255, 255));
    let rect = Rect::from_xywh(0.0, 0.0, size as f32, size as f32)
        .ok_or_else(|| anyhow!("invalid sprite size {size}"))?;
    pm.fill_rect(rect, &paint, Transform::identity(), None);
    Ok(pm)
}

/// Pixel bounds of `rect` inside the canvas, or `None` if empty.
fn clip(rect: &Rect, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
    let x0 = rect.x().floor().clamp(0.0, width as f32) as usize;
    let y0 = rect.y().floor().clamp(0.0, height as f32) as usize;
    let x1 = rect.right().ceil().clamp(0.0, width as f32) as usize;
    let y1 = rect.bottom().ceil().clamp(0.0, height as f32) as usize;
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(buf: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn corners_parse_and_place() {
        for code in ["tl", "tr", "bl", "br"] {
            assert_eq!(code.parse::<Corner>().unwrap().code(), code);
        }
        assert!("middle".parse::<Corner>().is_err());
        assert_eq!(Corner::TopRight.origin(800, 600, 100), (700.0, 0.0));
        assert_eq!(Corner::BottomLeft.origin(800, 600, 100), (0.0, 500.0));
    }

    #[test]
    fn marker_is_drawn_and_cleared() {
        let (w, h) = (320, 200);
        let scene = SceneConfig {
            marker_size: 20,
            ..SceneConfig::default()
        };
        let mut r = SkiaRenderer::new(w, h, scene).unwrap();
        let mut fb = vec![0u8; (w * h * 4) as usize];
        let mut timer = HighPrecisionTimer::new();

        r.render_frame(true, &mut fb, &mut timer).unwrap();
        assert_eq!(pixel(&fb, w, w - 5, h - 5), [255, 255, 255, 255]);
        assert_eq!(pixel(&fb, w, 5, 5), OPAQUE_BLACK);

        r.render_frame(false, &mut fb, &mut timer).unwrap();
        assert_eq!(pixel(&fb, w, w - 5, h - 5), OPAQUE_BLACK);
    }

    #[test]
    fn square_moves_between_frames() {
        let (w, h) = (400, 100);
        let mut r = SkiaRenderer::new(w, h, SceneConfig::default()).unwrap();
        let mut fb = vec![0u8; (w * h * 4) as usize];
        let mut timer = HighPrecisionTimer::new();
        // first frame: square centred on the left edge
        r.render_frame(false, &mut fb, &mut timer).unwrap();
        assert_eq!(pixel(&fb, w, 2, h / 2), [255, 255, 255, 255]);
        for _ in 0..60 {
            r.render_frame(false, &mut fb, &mut timer).unwrap();
        }
        assert_eq!(pixel(&fb, w, 2, h / 2), OPAQUE_BLACK);
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        let mut r = SkiaRenderer::new(10, 10, SceneConfig::default()).unwrap();
        let mut timer = HighPrecisionTimer::new();
        assert!(r.render_frame(false, &mut [0u8; 4], &mut timer).is_err());
    }
}
