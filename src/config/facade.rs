//! Entry points for loading an [`AmbitConfig`].

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::AmbitConfig;
use crate::error::ConfigurationError;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the full layered configuration for `workspace_root`.
    pub fn load(workspace_root: &Path) -> Result<AmbitConfig, ConfigurationError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            Environment::with_prefix("AMBIT")
                .separator("__")
                .try_parsing(true),
        );
        debug!(workspace = %workspace_root.display(), "Loading configuration");
        Self::finish(builder.build()?)
    }

    /// Load a single file over the built-in defaults, ignoring every other
    /// layer.
    pub fn load_from_file(path: &Path) -> Result<AmbitConfig, ConfigurationError> {
        if !path.exists() {
            return Err(ConfigurationError::Load(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?;
        Self::finish(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<AmbitConfig, ConfigurationError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?;
        Self::finish(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    fn finish(config: Config) -> Result<AmbitConfig, ConfigurationError> {
        let mut parsed: AmbitConfig = config.try_deserialize()?;
        parsed.fill_names();
        Ok(parsed)
    }
}
