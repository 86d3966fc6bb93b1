//! Beacon server
//!
//! Endpoint health monitoring and approval-gated CI pipeline orchestration.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod gateway;
pub mod realtime;
pub mod repository;
pub mod service;
