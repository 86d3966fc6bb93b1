//! Core domain types
//!
//! This module contains the core domain structures used across Beacon services.
//! The server persists them, the API serializes them and the realtime channel
//! pushes them to observers.

pub mod endpoint;
pub mod pipeline;
pub mod realtime;
pub mod service;
