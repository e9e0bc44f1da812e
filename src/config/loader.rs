use std::path::Path;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::pipeline::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Environment prefix; `FORECAST__DATABASE__URL` overrides `database.url`.
pub const ENV_PREFIX: &str = "FORECAST";

/// Layers defaults, an optional TOML file and `FORECAST__*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_file.display());
    }

    let mut builder = Config::builder().add_source(Config::try_from(&PipelineConfig::default())?);

    if let Some(path) = path {
        info!("Loading configuration from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("universe.symbols")
            .with_list_parse_key("universe.peers"),
    );

    let config: PipelineConfig = builder.build()?.try_deserialize()?;

    config.validate().map_err(|errors| {
        PipelineError::Config(config::ConfigError::Message(errors.join(", ")))
    })?;

    Ok(config)
}

/// Writes the default configuration as TOML, refusing to overwrite.
pub fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let rendered = toml::to_string_pretty(&PipelineConfig::default())?;
    std::fs::write(path, rendered)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
