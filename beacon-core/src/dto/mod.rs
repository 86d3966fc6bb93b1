//! Data Transfer Objects
//!
//! Request bodies accepted by the HTTP API and read views returned by it.
//! DTOs are lightweight representations of domain entities optimized for
//! network transfer.

pub mod endpoint;
pub mod pipeline;
