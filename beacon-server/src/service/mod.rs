//! Service Module
//!
//! Business logic layer of the server.
//! Services orchestrate between repositories and gateways and contain the
//! domain rules; they never see HTTP types.

pub mod monitor;
pub mod pipeline;
pub mod retry;

pub use monitor::{MonitorError, MonitorService};
pub use pipeline::{PipelineError, PipelineService};
