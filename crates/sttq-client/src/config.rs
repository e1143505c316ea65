use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::PathBuf;

fn default_server_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_model() -> String {
    "small".to_string()
}
fn default_pending_interval_secs() -> u64 {
    15
}
fn default_processing_interval_secs() -> u64 {
    5
}
fn default_fast_interval_secs() -> u64 {
    2
}
fn default_pool_full_backoff_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_audio_encoder_bin() -> String {
    "ffmpeg".to_string()
}

/// Client runtime configuration, loaded from `STTQ_CLIENT_*` environment
/// variables. `scan_root` and `bundle_password` have no defaults; both
/// must be supplied (by env var or CLI flag) before the pipeline can run.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub bundle_password: String,
    #[serde(default)]
    pub scan_root: PathBuf,
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_pending_interval_secs")]
    pub pending_interval_secs: u64,
    #[serde(default = "default_processing_interval_secs")]
    pub processing_interval_secs: u64,
    #[serde(default = "default_fast_interval_secs")]
    pub fast_interval_secs: u64,
    #[serde(default = "default_pool_full_backoff_secs")]
    pub pool_full_backoff_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_audio_encoder_bin")]
    pub audio_encoder_bin: String,
    #[serde(default)]
    pub keep_scratch: bool,
}

impl ClientConfig {
    pub fn load(scan_root: PathBuf, bundle_password: String) -> anyhow::Result<Self> {
        let mut config: ClientConfig = Figment::new()
            .merge(Env::prefixed("STTQ_CLIENT_"))
            .extract()?;
        config.scan_root = scan_root;
        if !bundle_password.is_empty() {
            config.bundle_password = bundle_password;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.bundle_password.is_empty() {
            anyhow::bail!("bundle password must be set (--password or STTQ_CLIENT_BUNDLE_PASSWORD)");
        }
        if !self.scan_root.is_dir() {
            anyhow::bail!("scan root '{}' is not a directory", self.scan_root.display());
        }
        Ok(())
    }

    pub fn pending_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pending_interval_secs)
    }
    pub fn processing_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.processing_interval_secs)
    }
    pub fn fast_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fast_interval_secs)
    }
    pub fn pool_full_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pool_full_backoff_secs)
    }
}
