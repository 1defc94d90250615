//! Built-in defaults, the lowest layer every other source overrides.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the default logging table applied.
///
/// Resource tables have no defaults here: each descriptor fills its own
/// fields through serde, so an executor named only in a file still gets
/// the standard pool sizes.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
