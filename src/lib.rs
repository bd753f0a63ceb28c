//! tarm - terminal explorer for Azure Resource Manager
//!
//! Browse ARM as a lazily expanded tree, view resources as JSON, and write
//! edits back with PATCH or PUT.

pub mod app;
pub mod azure;
pub mod browse;
pub mod command;
pub mod config;
pub mod error;
pub mod resource;
pub mod shell;

/// Version injected at compile time via TARM_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("TARM_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
