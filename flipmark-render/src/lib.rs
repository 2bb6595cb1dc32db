pub mod animation;
pub mod render;

pub use animation::EaseInOut;
pub use render::{Corner, FrameStats, SceneConfig, SkiaRenderer};
