//! Layered configuration loading
//!
//! Sources are applied in order, later ones overriding earlier ones:
//! the optional file, then environment variables named
//! `<PREFIX>__SECTION__KEY`.

use crate::errors::types::Result;
use ::config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Environment prefix used when the caller does not provide one
pub const DEFAULT_ENV_PREFIX: &str = "CCCP";

/// Load a typed configuration from an optional file and the environment.
///
/// A missing file is not an error; every field is expected to carry a
/// serde default.
pub fn load_config<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(File::from(path.to_path_buf()).required(false));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
