//! Audio output and sample capture.
//!
//! PCM chunks from the active session are pushed to an `aplay` child through
//! a queue, so a slow or restarting player never blocks the stream pump.
//! While a sample is being recorded the same chunks are also copied into a
//! capture buffer, which is then encoded to MP3 with ffmpeg.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pirate_proto::config::AudioConfig;

pub trait AudioSink: Send + Sync {
    /// Queue one chunk of raw PCM for playback.  Never blocks.
    fn write(&self, chunk: &[u8]);
}

#[async_trait]
pub trait SampleRecorder: Send + Sync {
    /// Capture a few seconds of what is playing and return the encoded file.
    async fn record_sample(&self) -> anyhow::Result<PathBuf>;
}

struct Capture {
    buf: Vec<u8>,
    limit: usize,
}

pub struct Speaker {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    capture: Arc<Mutex<Option<Capture>>>,
    ffmpeg: PathBuf,
    sample_path: PathBuf,
    sample_len: Duration,
    sample_rate: u32,
    channels: u16,
}

impl Speaker {
    /// Start the player.  Fails if `aplay` cannot be launched at all.
    pub fn start(
        aplay: PathBuf,
        ffmpeg: PathBuf,
        sample_path: PathBuf,
        sample_len: Duration,
        audio: &AudioConfig,
    ) -> anyhow::Result<Self> {
        let args = player_args(audio);
        let first = spawn_player(&aplay, &args)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(play(aplay, args, first, rx));
        Ok(Self {
            tx,
            capture: Arc::new(Mutex::new(None)),
            ffmpeg,
            sample_path,
            sample_len,
            sample_rate: audio.sample_rate,
            channels: audio.channels,
        })
    }

    fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2
    }

    async fn encode(&self, pcm: &[u8]) -> anyhow::Result<()> {
        if let Some(dir) = self.sample_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut child = Command::new(&self.ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "s16le",
                "-ar",
                &self.sample_rate.to_string(),
                "-ac",
                &self.channels.to_string(),
                "-i",
                "-",
                "-y",
            ])
            .arg(&self.sample_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("encoder stdin not captured"))?;
            stdin.write_all(pcm).await?;
            stdin.shutdown().await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            anyhow::bail!("sample encoder exited with {}", status);
        }
        Ok(())
    }
}

impl AudioSink for Speaker {
    fn write(&self, chunk: &[u8]) {
        if let Ok(mut capture) = self.capture.lock() {
            if let Some(cap) = capture.as_mut() {
                let room = cap.limit.saturating_sub(cap.buf.len());
                cap.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
        }
        if self.tx.send(chunk.to_vec()).is_err() {
            debug!("sink: player task gone");
        }
    }
}

#[async_trait]
impl SampleRecorder for Speaker {
    async fn record_sample(&self) -> anyhow::Result<PathBuf> {
        {
            let mut capture = self
                .capture
                .lock()
                .map_err(|_| anyhow::anyhow!("capture lock poisoned"))?;
            if capture.is_some() {
                anyhow::bail!("a sample is already being recorded");
            }
            let limit = self.bytes_per_second() * self.sample_len.as_secs().max(1) as usize;
            *capture = Some(Capture {
                buf: Vec::with_capacity(limit),
                limit,
            });
        }
        info!("sink: recording {}s sample", self.sample_len.as_secs());
        tokio::time::sleep(self.sample_len).await;

        let pcm = self
            .capture
            .lock()
            .map_err(|_| anyhow::anyhow!("capture lock poisoned"))?
            .take()
            .map(|c| c.buf)
            .unwrap_or_default();
        if pcm.is_empty() {
            anyhow::bail!("no audio captured");
        }
        self.encode(&pcm).await?;
        info!(
            "sink: sample saved to {} ({} bytes pcm)",
            self.sample_path.display(),
            pcm.len()
        );
        Ok(self.sample_path.clone())
    }
}

fn player_args(audio: &AudioConfig) -> Vec<String> {
    vec![
        "-q".into(),
        "-t".into(),
        "raw".into(),
        "-f".into(),
        "S16_LE".into(),
        "-r".into(),
        audio.sample_rate.to_string(),
        "-c".into(),
        audio.channels.to_string(),
        "-".into(),
    ]
}

fn spawn_player(aplay: &Path, args: &[String]) -> anyhow::Result<(Child, ChildStdin)> {
    let mut child = Command::new(aplay)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {}: {}", aplay.display(), e))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow::anyhow!("player stdin not captured"))?;
    info!("sink: player pid {}", child.id().unwrap_or_default());
    Ok((child, stdin))
}

async fn play(
    aplay: PathBuf,
    args: Vec<String>,
    first: (Child, ChildStdin),
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut player = Some(first);
    while let Some(chunk) = rx.recv().await {
        if player.is_none() {
            match spawn_player(&aplay, &args) {
                Ok(p) => player = Some(p),
                Err(e) => {
                    warn!("sink: {}", e);
                    continue;
                }
            }
        }
        let Some((_, stdin)) = player.as_mut() else {
            continue;
        };
        if let Err(e) = stdin.write_all(&chunk).await {
            warn!("sink: player write failed ({}), restarting", e);
            player = None;
        }
    }
    debug!("sink: player queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_args_match_pcm_format() {
        let args = player_args(&AudioConfig::default());
        assert_eq!(
            args,
            vec!["-q", "-t", "raw", "-f", "S16_LE", "-r", "44100", "-c", "2", "-"]
        );
    }

    #[test]
    fn test_capture_stops_at_limit() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let speaker = Speaker {
            tx,
            capture: Arc::new(Mutex::new(Some(Capture {
                buf: Vec::new(),
                limit: 6,
            }))),
            ffmpeg: PathBuf::from("ffmpeg"),
            sample_path: PathBuf::from("/tmp/clip.mp3"),
            sample_len: Duration::from_secs(5),
            sample_rate: 44100,
            channels: 2,
        };
        speaker.write(&[1, 2, 3, 4]);
        speaker.write(&[5, 6, 7, 8]);
        let cap = speaker.capture.lock().unwrap();
        assert_eq!(cap.as_ref().unwrap().buf, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_concurrent_recording_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let speaker = Speaker {
            tx,
            capture: Arc::new(Mutex::new(Some(Capture {
                buf: Vec::new(),
                limit: 10,
            }))),
            ffmpeg: PathBuf::from("ffmpeg"),
            sample_path: PathBuf::from("/tmp/clip.mp3"),
            sample_len: Duration::from_secs(5),
            sample_rate: 44100,
            channels: 2,
        };
        let err = speaker.record_sample().await.unwrap_err();
        assert!(err.to_string().contains("already"));
    }
}
