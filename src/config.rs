use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::db::{Backend, ConnectionSettings};

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: Backend,
    pub host: String,
    pub port: Option<u16>,
    // Deliberately no defaults for credentials.
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "gemini", "remote", or "ollama"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub backend: String, // "ollama" or "openai"
    pub model: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
    pub tenant: String,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecallConfig {
    pub enabled: bool,
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector_store: VectorStoreConfig,
    pub recall: RecallConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Disable similarity recall for this run
    #[arg(long)]
    pub no_recall: bool,

    /// Answer a single question on stdout instead of serving HTTP
    #[arg(long, value_name = "QUESTION")]
    pub ask: Option<String>,
}

const ENV_PREFIX: &str = "SAKILA_ASSIST";

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Compiled-in defaults first, everything else layers on top
        let mut config_builder = Config::builder()
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 3000)?
            .set_default("llm.backend", "gemini")?
            .set_default("llm.model", "gemini-pro")?
            .set_default("database.backend", "mysql")?
            .set_default("database.host", "localhost")?
            .set_default("database.database", "sakila")?
            .set_default("embedding.backend", "ollama")?
            .set_default("embedding.model", "all-minilm")?
            .set_default("vector_store.url", "http://127.0.0.1:8000")?
            .set_default("vector_store.collection", "query_embeddings")?
            .set_default("vector_store.tenant", "default_tenant")?
            .set_default("vector_store.database", "default_database")?
            .set_default("recall.enabled", true)?
            .set_default("recall.top_k", 3)?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/sakila-assist/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // Secrets usually arrive through the environment, e.g. SAKILA_ASSIST__LLM__API_KEY
        config_builder = config_builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if args.no_recall {
            config.recall.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.recall.top_k == 0 {
            return Err(ConfigError::Message(
                "recall.top_k must be at least 1".to_string(),
            ));
        }

        if self.database.backend == Backend::MySql
            && (self.database.user.is_none() || self.database.password.is_none())
        {
            return Err(ConfigError::Message(
                "database.user and database.password are required for the mysql backend"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            backend: self.backend,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            database: self.database.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn args_for(file: &tempfile::NamedTempFile) -> CliArgs {
        CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        }
    }

    #[test]
    fn file_values_layer_over_defaults() {
        let file = write_config(
            r#"
            [database]
            user = "reader"
            password = "secret"
            database = "sakila1"

            [recall]
            top_k = 5
            "#,
        );

        let config = AppConfig::new(&args_for(&file)).unwrap();
        assert_eq!(config.database.database, "sakila1");
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.recall.top_k, 5);
        assert!(config.recall.enabled);
        assert_eq!(config.web.port, 3000);
        assert_eq!(config.llm.backend, "gemini");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.vector_store.tenant, "default_tenant");
        assert_eq!(config.vector_store.database, "default_database");
    }

    #[test]
    fn mysql_requires_credentials() {
        let file = write_config(
            r#"
            [database]
            backend = "mysql"
            user = "reader"
            "#,
        );

        let err = AppConfig::new(&args_for(&file)).unwrap_err();
        assert!(err.to_string().contains("database.password"));
    }

    #[test]
    fn duckdb_needs_no_credentials() {
        let file = write_config(
            r#"
            [database]
            backend = "duckdb"
            database = "/tmp/sakila.duckdb"
            "#,
        );

        let config = AppConfig::new(&args_for(&file)).unwrap();
        let settings = config.database.connection_settings();
        assert_eq!(settings.backend, Backend::DuckDb);
        assert!(settings.user.is_empty());
    }

    #[test]
    fn cli_overrides_win() {
        let file = write_config(
            r#"
            [database]
            backend = "duckdb"
            database = "sakila.duckdb"
            "#,
        );
        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            host: Some("0.0.0.0".to_string()),
            port: Some(8080),
            no_recall: true,
            ask: None,
        };

        let config = AppConfig::new(&args).unwrap();
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 8080);
        assert!(!config.recall.enabled);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let file = write_config(
            r#"
            [database]
            backend = "duckdb"
            database = "sakila.duckdb"

            [recall]
            top_k = 0
            "#,
        );

        assert!(AppConfig::new(&args_for(&file)).is_err());
    }
}
