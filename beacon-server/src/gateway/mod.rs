//! Gateways to external systems
//!
//! Capability traits for the CI provider and outbound notifications, with
//! their production implementations. Services only see the traits.

pub mod ci;
pub mod notify;

pub use ci::{CiError, CiPipelineStatus, CiProvider, GitLabCiProvider};
pub use notify::{HttpRelayNotifier, LogNotifier, NotifyError, Notifier};
