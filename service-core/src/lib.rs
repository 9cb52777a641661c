//! service-core: shared infrastructure for the registration service.
pub mod config;
pub mod error;
pub mod observability;
