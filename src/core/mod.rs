//! Core functionality for the Steam Controller bridge
//! Transport plumbing, the report decoder, the link session, the pipeline and the
//! supervisor that ties them together.

pub mod bluetooth;
pub mod controller;
pub mod pipeline;
pub mod session;
pub mod supervisor;

// Re-export commonly used types
pub use controller::{DecodedEvent, UpdateEvent, decode};
pub use pipeline::{PipelineStats, StreamPipeline};
pub use session::{LinkSession, LinkState};
pub use supervisor::{Lifecycle, LifecycleSnapshot, SessionSupervisor, SupervisorHandle};
