use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::PathBuf;

fn default_capacity() -> usize {
    4
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_model() -> String {
    "small".to_string()
}
fn default_retention_hours() -> u64 {
    24
}
fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./sttq-data/uploads")
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("./sttq-data/work")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("./sttq-data/results")
}
fn default_transcriber_bin() -> String {
    "whisper-cli".to_string()
}

/// Server runtime configuration, loaded from environment variables with
/// documented defaults (see `STTQ_*` below). The bundle password has no
/// default; a missing value is a startup failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_transcriber_bin")]
    pub transcriber_bin: String,
    pub bundle_password: String,
}

impl ServerConfig {
    /// Load from `STTQ_*` environment variables, falling back to the
    /// defaults above. `STTQ_BUNDLE_PASSWORD` is required.
    pub fn load() -> anyhow::Result<Self> {
        let config: ServerConfig = Figment::new().merge(Env::prefixed("STTQ_")).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            anyhow::bail!("capacity must be > 0");
        }
        if self.retention_hours == 0 {
            anyhow::bail!("retention_hours must be > 0");
        }
        if self.bundle_password.is_empty() {
            anyhow::bail!("STTQ_BUNDLE_PASSWORD must be set");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        let hours = (self.retention_hours as f64 / 24.0).max(1.0 / 3600.0);
        std::time::Duration::from_secs_f64(hours * 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_formats_host_and_port() {
        let config = ServerConfig {
            capacity: 1,
            host: "127.0.0.1".to_string(),
            port: 9000,
            default_model: "small".to_string(),
            retention_hours: 24,
            max_upload_bytes: 1024,
            log_level: "info".to_string(),
            uploads_dir: PathBuf::from("/tmp/u"),
            work_dir: PathBuf::from("/tmp/w"),
            results_dir: PathBuf::from("/tmp/r"),
            transcriber_bin: "whisper-cli".to_string(),
            bundle_password: "pw".to_string(),
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }
}
