//! Configuration loading from files and the environment.
//!
//! Format is picked by extension (TOML, YAML, JSON). Environment variables
//! prefixed `JUNCTION_` override file values (`JUNCTION_LISTEN_ADDR`,
//! `JUNCTION_DATABASE_URL`, ...), twelve-factor style, so containers can
//! run without a file at all.
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration, merging an optional file with the environment.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        let config_path = Path::new(path);
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };

        builder = builder.add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ));
    }

    let settings = builder
        .add_source(Environment::with_prefix("JUNCTION").separator("__"))
        .build()
        .wrap_err("failed to assemble configuration sources")?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("failed to deserialize gateway configuration")?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn load_toml_config() {
        let toml = r#"
listen_addr = "127.0.0.1:3000"
database_url = "postgres://db:5432/gw"

[transport]
max_idle_per_host = 32
"#;
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(file, "{toml}").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.database_url, "postgres://db:5432/gw");
        assert_eq!(config.transport.max_idle_per_host, 32);
        // Untouched fields keep their defaults.
        assert_eq!(config.log_format, "json");
    }

    #[test]
    fn load_yaml_config() {
        let yaml = r#"
listen_addr: "127.0.0.1:3001"
redis_url: "redis://cache:6379/1"
"#;
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{yaml}").unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3001");
        assert_eq!(config.redis_url, "redis://cache:6379/1");
    }

    #[test]
    fn no_file_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(file, "listen_addr = [not toml").unwrap();
        assert!(load_config(file.path().to_str()).is_err());
    }
}
