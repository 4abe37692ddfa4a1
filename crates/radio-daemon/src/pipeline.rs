//! Stream decoding through an ffmpeg child process.
//!
//! ffmpeg pulls the station URL, normalizes loudness, and writes raw PCM to
//! stdout.  Its `silencedetect` filter reports `silence_start` /
//! `silence_end` on stderr; those lines become [`SilenceMarker`]s.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pirate_proto::config::{AudioConfig, StreamConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceMarker {
    Start,
    End,
}

/// Scan one line of ffmpeg stderr for a silence marker.
pub fn parse_marker(line: &str) -> Option<SilenceMarker> {
    for word in line.split_whitespace() {
        if word.contains("silence_start") {
            return Some(SilenceMarker::Start);
        }
        if word.contains("silence_end") {
            return Some(SilenceMarker::End);
        }
    }
    None
}

/// Liveness and termination of whatever is producing the audio.
pub trait ProcessControl: Send + Sync {
    /// Terminate.  Safe to call more than once.
    fn kill(&self);
    fn is_alive(&self) -> bool;
}

/// A launched decoder: PCM on `audio`, silence markers on `markers`.
pub struct DecodeProcess {
    pub audio: Box<dyn AsyncRead + Send + Unpin>,
    pub markers: mpsc::Receiver<SilenceMarker>,
    pub control: Arc<dyn ProcessControl>,
}

#[async_trait]
pub trait DecodePipeline: Send + Sync {
    async fn launch(&self, url: &str) -> anyhow::Result<DecodeProcess>;
}

/// `ProcessControl` for a tokio child.  The child is dropped after a kill
/// so tokio reaps it in the background.
pub struct ChildControl {
    child: Mutex<Option<Child>>,
    label: String,
}

impl ChildControl {
    pub fn new(child: Child, label: String) -> Self {
        Self {
            child: Mutex::new(Some(child)),
            label,
        }
    }
}

impl ProcessControl for ChildControl {
    fn kill(&self) {
        let Ok(mut guard) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            if let Err(e) = child.start_kill() {
                debug!("pipeline: kill {}: {}", self.label, e);
            } else {
                info!("pipeline: killed {}", self.label);
            }
        }
    }

    fn is_alive(&self) -> bool {
        let Ok(mut guard) = self.child.lock() else {
            return false;
        };
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Control for a launch that never produced a process.
pub struct NoProcess;

impl ProcessControl for NoProcess {
    fn kill(&self) {}

    fn is_alive(&self) -> bool {
        false
    }
}

pub struct FfmpegPipeline {
    binary: PathBuf,
    sample_rate: u32,
    channels: u16,
    noise_db: i32,
    detect_secs: u64,
}

impl FfmpegPipeline {
    pub fn new(binary: PathBuf, audio: &AudioConfig, stream: &StreamConfig) -> Self {
        Self {
            binary,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            noise_db: stream.silence_noise_db,
            detect_secs: stream.silence_detect_secs,
        }
    }

    fn filter_chain(&self) -> String {
        format!(
            "loudnorm=I=-14:LRA=7:TP=-2,silencedetect=noise={}dB:d={}",
            self.noise_db, self.detect_secs
        )
    }

    pub fn args(&self, url: &str) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "info".into(),
            "-i".into(),
            url.into(),
            "-vn".into(),
            "-af".into(),
            self.filter_chain(),
            "-ar".into(),
            self.sample_rate.to_string(),
            "-ac".into(),
            self.channels.to_string(),
            "-f".into(),
            "s16le".into(),
            "-".into(),
        ]
    }
}

#[async_trait]
impl DecodePipeline for FfmpegPipeline {
    async fn launch(&self, url: &str) -> anyhow::Result<DecodeProcess> {
        let mut child = Command::new(&self.binary)
            .args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {}", self.binary.display(), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("ffmpeg stderr not captured"))?;

        let pid = child.id().unwrap_or_default();
        info!("pipeline: ffmpeg pid {} for {}", pid, url);

        let (tx, markers) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(marker) = parse_marker(&line) {
                            debug!("pipeline: {:?} ({})", marker, line.trim());
                            if tx.send(marker).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("pipeline: stderr read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(DecodeProcess {
            audio: Box::new(stdout),
            markers,
            control: Arc::new(ChildControl::new(child, format!("ffmpeg pid {}", pid))),
        })
    }
}
