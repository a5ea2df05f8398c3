//! JSON-file persistence for the mode configuration.
//!
//! The document is written to a temp file and renamed into place so a
//! reader can never observe a torn override/replay pair.

use crate::application::mode_controller::ModeConfigPersistence;
use crate::domain::mode::ModeConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

pub struct ModeConfigFile {
    path: PathBuf,
}

impl ModeConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModeConfigPersistence for ModeConfigFile {
    async fn load(&self) -> Result<ModeConfig> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Malformed mode config at {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ModeConfig::default()),
            Err(e) => Err(e).context("Failed to read mode config"),
        }
    }

    async fn save(&self, config: &ModeConfig) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create mode config directory")?;
        }
        let raw = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .await
            .context("Failed to write mode config")?;
        fs::rename(&tmp, &self.path)
            .await
            .context("Failed to move mode config into place")?;
        debug!("Mode config saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mode::Mode;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("tradecouncil-test-{}", uuid::Uuid::new_v4()));
        let file = ModeConfigFile::new(dir.join("mode_config.json"));

        // Missing file loads the default.
        assert_eq!(file.load().await.unwrap(), ModeConfig::default());

        let config = ModeConfig {
            manual_override: Some(Mode::SimOpen),
            ..Default::default()
        };
        file.save(&config).await.unwrap();
        assert_eq!(file.load().await.unwrap(), config);

        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}
