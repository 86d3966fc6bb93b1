//! Beacon Core
//!
//! Core types shared by the Beacon monitoring and release-orchestration backend.
//!
//! This crate contains:
//! - Domain types: Endpoints and their statistics, CI services, pipeline units,
//!   runs, authorization requests and execution history
//! - DTOs: Request and view objects exchanged over the HTTP API

pub mod domain;
pub mod dto;
