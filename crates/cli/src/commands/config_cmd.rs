//! `redscope config`: show the effective configuration.

use redscope_config::{API_KEY_ENV, AppConfig, BASE_URL_ENV, ConfigError, MODEL_ENV, RuntimeConfig};
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    println!("# {}", path.display());

    match AppConfig::load(Some(&path)) {
        Ok(config) => {
            println!("# {API_KEY_ENV} = [REDACTED]");
            println!("# {BASE_URL_ENV} = {}", config.base_url);
            println!("# {MODEL_ENV} = {}", config.model);
            println!();
            println!("{}", toml::to_string_pretty(&config.runtime)?);
        }
        Err(ConfigError::MissingEnv(key)) => {
            println!("# {key} is not set; redscope will not start until it is");
            println!();
            let runtime = RuntimeConfig::load_from(&path)?;
            println!("{}", toml::to_string_pretty(&runtime)?);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
