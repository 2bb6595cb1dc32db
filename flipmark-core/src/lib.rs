pub mod channel;
pub mod edge;
pub mod error;
pub mod pins;
pub mod record;
pub mod source;
pub mod word;

pub use channel::{Channel, HoldFrames};
pub use edge::EdgeDetector;
pub use error::CoreError;
pub use pins::{PinState, PinUpdate};
pub use record::EventRecord;
pub use source::{FrameContext, TriggerEvent, TriggerSource};
pub use word::TriggerWord;
