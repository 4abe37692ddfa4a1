//! Physical buttons.
//!
//! Each button runs its own dispatcher task.  A falling edge is accepted
//! only if the debounce interval has passed since the last accepted edge.
//! For buttons with a hold action the pin level is sampled again shortly
//! after the edge, off the detection path, to tell a press from a hold.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Press: random station.  Hold: identify the song.
    Random,
    /// Press: random favorite.  Hold: save the current station.
    Favorite,
    Mute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressKind {
    Press,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub button: Button,
    pub kind: PressKind,
}

#[async_trait]
pub trait Pin: Send + Sync {
    /// Resolve on the next falling edge (button pushed).
    async fn falling_edge(&self) -> anyhow::Result<()>;
    /// Whether the button is held down right now.
    async fn is_pressed(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct InputTiming {
    pub debounce: Duration,
    pub hold_sample: Duration,
}

/// Run the dispatcher for one button until `events` closes or the pin
/// fails.
pub fn spawn_button(
    button: Button,
    pin: Arc<dyn Pin>,
    with_hold: bool,
    timing: InputTiming,
    events: mpsc::Sender<InputEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_accepted: Option<Instant> = None;
        loop {
            if let Err(e) = pin.falling_edge().await {
                warn!("input: {:?} pin failed: {}", button, e);
                return;
            }
            let now = Instant::now();
            if let Some(last) = last_accepted {
                if now.duration_since(last) < timing.debounce {
                    debug!("input: {:?} bounce ignored", button);
                    continue;
                }
            }
            last_accepted = Some(now);

            if !with_hold {
                if events
                    .send(InputEvent {
                        button,
                        kind: PressKind::Press,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }

            let pin = Arc::clone(&pin);
            let events = events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timing.hold_sample).await;
                let kind = if pin.is_pressed().await {
                    PressKind::Hold
                } else {
                    PressKind::Press
                };
                debug!("input: {:?} {:?}", button, kind);
                let _ = events.send(InputEvent { button, kind }).await;
            });
        }
    })
}

// ── sysfs GPIO ───────────────────────────────────────────────────────────────

/// Active-low button on a sysfs GPIO line with the internal pull-up, polled
/// at a fixed interval.
pub struct SysfsPin {
    number: u32,
    value: PathBuf,
    poll: Duration,
    /// Last level seen; `true` is high (released).
    high: AtomicBool,
}

impl SysfsPin {
    pub fn open(root: &Path, number: u32, poll: Duration) -> anyhow::Result<Self> {
        let dir = root.join(format!("gpio{}", number));
        if !dir.exists() {
            std::fs::write(root.join("export"), number.to_string())
                .map_err(|e| anyhow::anyhow!("cannot export gpio {}: {}", number, e))?;
        }
        // Direction may already be fixed by the overlay
        if let Err(e) = std::fs::write(dir.join("direction"), "in") {
            debug!("input: gpio {} direction: {}", number, e);
        }
        let value = dir.join("value");
        let raw = std::fs::read_to_string(&value)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", value.display(), e))?;
        let level = raw.trim() != "0";
        info!("input: gpio {} ready (level {})", number, u8::from(level));
        Ok(Self {
            number,
            value,
            poll,
            high: AtomicBool::new(level),
        })
    }
}

async fn read_level(value: &Path) -> anyhow::Result<bool> {
    let raw = tokio::fs::read_to_string(value)
        .await
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", value.display(), e))?;
    Ok(raw.trim() != "0")
}

#[async_trait]
impl Pin for SysfsPin {
    async fn falling_edge(&self) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(self.poll).await;
            let level = read_level(&self.value).await?;
            let was_high = self.high.swap(level, Ordering::SeqCst);
            if was_high && !level {
                debug!("input: gpio {} falling edge", self.number);
                return Ok(());
            }
        }
    }

    async fn is_pressed(&self) -> bool {
        matches!(read_level(&self.value).await, Ok(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use tokio::time::sleep;

    struct FakePin {
        edges: Mutex<mpsc::Receiver<()>>,
        pressed: AtomicBool,
    }

    #[async_trait]
    impl Pin for FakePin {
        async fn falling_edge(&self) -> anyhow::Result<()> {
            match self.edges.lock().await.recv().await {
                Some(()) => Ok(()),
                None => anyhow::bail!("pin closed"),
            }
        }

        async fn is_pressed(&self) -> bool {
            self.pressed.load(Ordering::SeqCst)
        }
    }

    fn timing() -> InputTiming {
        InputTiming {
            debounce: Duration::from_millis(1000),
            hold_sample: Duration::from_millis(500),
        }
    }

    fn setup(with_hold: bool) -> (mpsc::Sender<()>, Arc<FakePin>, mpsc::Receiver<InputEvent>) {
        let (edge_tx, edge_rx) = mpsc::channel(8);
        let pin = Arc::new(FakePin {
            edges: Mutex::new(edge_rx),
            pressed: AtomicBool::new(false),
        });
        let (tx, rx) = mpsc::channel(8);
        spawn_button(Button::Random, pin.clone(), with_hold, timing(), tx);
        (edge_tx, pin, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_before_sample_is_press() {
        let (edges, _pin, mut events) = setup(true);
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(600)).await;
        assert_eq!(
            events.try_recv().unwrap(),
            InputEvent {
                button: Button::Random,
                kind: PressKind::Press
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_down_at_sample_is_hold() {
        let (edges, pin, mut events) = setup(true);
        pin.pressed.store(true, Ordering::SeqCst);
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(400)).await;
        assert!(events.try_recv().is_err());
        sleep(Duration::from_millis(200)).await;
        assert_eq!(events.try_recv().unwrap().kind, PressKind::Hold);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounces_inside_window_are_dropped() {
        let (edges, _pin, mut events) = setup(true);
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(200)).await;
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(700)).await;
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(600)).await;
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());

        // 1.5s after the accepted edge
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(600)).await;
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_only_button_reports_immediately() {
        let (edges, pin, mut events) = setup(false);
        pin.pressed.store(true, Ordering::SeqCst);
        edges.send(()).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(events.try_recv().unwrap().kind, PressKind::Press);
    }

    #[tokio::test]
    async fn test_sysfs_pin_edges() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("gpio16");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("value"), "1\n").unwrap();

        let pin = SysfsPin::open(root.path(), 16, Duration::from_millis(5)).unwrap();
        assert!(!pin.is_pressed().await);
        assert_eq!(std::fs::read_to_string(dir.join("direction")).unwrap(), "in");

        std::fs::write(dir.join("value"), "0\n").unwrap();
        tokio::time::timeout(Duration::from_secs(2), pin.falling_edge())
            .await
            .unwrap()
            .unwrap();
        assert!(pin.is_pressed().await);
    }
}
