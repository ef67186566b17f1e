//! Configuration loading for the CLI

use anyhow::{Context, Result};
use kind_ps_lib::PipelineConfig;
use std::path::Path;

/// Environment variable prefix, e.g. `KIND_PS_PROC_ROOT=/host/proc`
pub const ENV_PREFIX: &str = "KIND_PS";

/// Load pipeline settings from an optional file and `KIND_PS_*` variables
///
/// Environment variables override the file; unset keys keep their defaults.
pub fn load(file: Option<&Path>) -> Result<PipelineConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = file {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX))
        .build()
        .context("Failed to load configuration")?;

    config
        .try_deserialize()
        .context("Invalid configuration")
}
