pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;

// Layered boundaries: ports in `app`, adapters in `infra`
pub mod app;
pub mod infra;
