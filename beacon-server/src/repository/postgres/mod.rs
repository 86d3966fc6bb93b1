//! PostgreSQL persistence
//!
//! sqlx-backed implementations of the repository traits. Each repository owns
//! a clone of the shared connection pool.

mod endpoint;
mod pipeline;
mod user;

pub use endpoint::PgEndpointRepository;
pub use pipeline::PgPipelineRepository;
pub use user::PgUserDirectory;
