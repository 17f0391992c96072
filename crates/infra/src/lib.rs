//! Adapters for `warden-auth`: vault key backend, PostgreSQL repositories and
//! environment configuration.

pub mod config;
pub mod postgres;
pub mod vault;

pub use config::AppConfig;
pub use vault::{VaultConfig, VaultKeyBackend};
