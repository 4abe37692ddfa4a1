//! Output volume through ALSA's `amixer`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

#[async_trait]
pub trait VolumeControl: Send + Sync {
    async fn set_muted(&self, muted: bool) -> anyhow::Result<()>;
}

pub struct Amixer {
    binary: PathBuf,
    control: String,
}

impl Amixer {
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            control: "Master".to_string(),
        }
    }

    fn args(&self, muted: bool) -> [String; 4] {
        let level = if muted { "0%" } else { "100%" };
        [
            "-q".to_string(),
            "set".to_string(),
            self.control.clone(),
            level.to_string(),
        ]
    }
}

#[async_trait]
impl VolumeControl for Amixer {
    async fn set_muted(&self, muted: bool) -> anyhow::Result<()> {
        let status = Command::new(&self.binary)
            .args(self.args(muted))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("amixer exited with {}", status);
        }
        info!("mixer: {}", if muted { "muted" } else { "unmuted" });
        Ok(())
    }
}
