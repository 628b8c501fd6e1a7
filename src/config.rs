use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for the appointment service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClinicConfig {
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Workflow engine settings
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human readable output
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Re-read and retry attempts after a concurrent modification
    pub conflict_retry_attempts: u32,
    /// Duration used when scheduling without an explicit one
    pub default_duration_minutes: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            conflict_retry_attempts: 2,
            default_duration_minutes: 30,
        }
    }
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            database: Some(DatabaseConfig {
                url: "sqlite://clinic.db".to_string(),
                max_connections: 5,
                auto_migrate: true,
            }),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            workflow: WorkflowConfig::default(),
        }
    }
}

impl ClinicConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (clinic.toml, .clinic-rc)
    /// 3. Environment variables (prefixed with CLINIC_, nested keys split on `__`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&ClinicConfig::default())?);

        if Path::new("clinic.toml").exists() {
            builder = builder.add_source(File::with_name("clinic"));
        }

        if Path::new(".clinic-rc").exists() {
            builder = builder.add_source(File::with_name(".clinic-rc").format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("CLINIC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let clinic_config: ClinicConfig = config.try_deserialize()?;
        Ok(clinic_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ClinicConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = ClinicConfig::load_env_file();
        ClinicConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ClinicConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let defaults = ClinicConfig::default();
        let text = toml::to_string_pretty(&defaults).unwrap();
        let parsed: ClinicConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.workflow.conflict_retry_attempts, 2);
        assert_eq!(parsed.observability.log_level, "info");
        assert!(parsed.database.unwrap().auto_migrate);
    }

    #[test]
    fn test_save_to_file_writes_sections() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clinic.toml");

        ClinicConfig::default().save_to_file(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[workflow]"));
        assert!(written.contains("conflict_retry_attempts = 2"));
    }
}
