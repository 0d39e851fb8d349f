//! Configuration loading, env substitution, and validation.
//!
//! Config files: `chanreg.toml`, `chanreg.yaml`, or `chanreg.json`
//! Searched in `./` then `~/.config/chanreg/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{CategoriesConfig, ChanregConfig, DatabaseConfig, SequencesConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
