pub mod backend;
pub mod config;
pub mod error;
pub mod port;
pub mod recorder;
pub mod scheduler;
pub mod sim;
pub mod triglog;

pub use backend::{AudioOut, CancelToken, Display, InputDevice, OutputPort, Rig};
pub use config::{RecordPolicy, RunConfig};
pub use error::{PortError, RunError};
pub use port::{MemoryPort, PortSpec};
pub use recorder::EventRecorder;
pub use scheduler::{FrameDecision, RunSummary, SchedulerState, TriggerScheduler};
pub use triglog::{LogPaths, RunMetadata, TriggerLog};
