//! Configuration loading
//!
//! Builds a [`ResilinkConfig`](resilink_domain::ResilinkConfig) from files
//! and `RESILINK_*` environment variables.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    apply_env_overrides, load, load_from_file, load_from_str, probe_config_paths, ConfigFormat,
};
