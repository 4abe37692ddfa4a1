//! Status display engine.
//!
//! A single task owns the panel.  Everyone else holds a [`DisplayHandle`]
//! and sends commands; the engine guarantees that at most one animation
//! loop is drawing at any time and that a stale restore timer never
//! overrides a newer status.

pub mod assets;
pub mod code;
pub mod driver;

use pirate_proto::pick::Picker;
use pirate_proto::protocol::{DisplayStatus, RestorePolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use assets::{read_frames, AnimationIndex, AssetError, FrameReader};
use code::CodeEncoder;
use driver::{DisplayDriver, BLACK};

/// Fallback for a temporarily shown status or code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restore {
    pub after: Duration,
    pub target: DisplayStatus,
}

#[derive(Debug)]
pub enum DisplayCommand {
    ShowStatus(DisplayStatus),
    ShowCode {
        text: String,
        temporary: Option<Restore>,
    },
}

/// Cheap, cloneable sender side of the display queue.
#[derive(Clone)]
pub struct DisplayHandle {
    tx: mpsc::Sender<DisplayCommand>,
}

impl DisplayHandle {
    pub async fn show_status(&self, status: DisplayStatus) {
        if self.tx.send(DisplayCommand::ShowStatus(status)).await.is_err() {
            warn!("display: engine gone, dropping {}", status);
        }
    }

    pub async fn show_code(&self, text: String, temporary: Option<Restore>) {
        if self
            .tx
            .send(DisplayCommand::ShowCode { text, temporary })
            .await
            .is_err()
        {
            warn!("display: engine gone, dropping code image");
        }
    }
}

#[cfg(test)]
impl DisplayHandle {
    /// A handle with no engine behind it; commands land on the receiver.
    pub(crate) fn detached() -> (Self, mpsc::Receiver<DisplayCommand>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

pub struct DisplaySettings {
    pub transient_after: Duration,
    pub code_size: u32,
}

struct AnimationLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct DisplayEngine {
    driver: Arc<dyn DisplayDriver>,
    encoder: Arc<dyn CodeEncoder>,
    index: AnimationIndex,
    /// Frames of every variant shown so far, by (asset, variant).
    frames: HashMap<(String, u32), Vec<Arc<[u8]>>>,
    picker: Picker,
    settings: DisplaySettings,
    current: Option<DisplayStatus>,
    /// Bumped on every accepted show; restore timers carry the value they
    /// were armed with.
    generation: u64,
    animation: Option<AnimationLoop>,
    restore_timer: Option<JoinHandle<()>>,
    /// Restore timers report back here with the generation they were armed
    /// with.
    restore_tx: mpsc::UnboundedSender<(u64, DisplayStatus)>,
}

impl DisplayEngine {
    /// Start the engine task and return a handle to it.
    pub fn spawn(
        driver: Arc<dyn DisplayDriver>,
        encoder: Arc<dyn CodeEncoder>,
        index: AnimationIndex,
        picker: Picker,
        settings: DisplaySettings,
    ) -> (DisplayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let (restore_tx, restore_rx) = mpsc::unbounded_channel();
        let engine = Self {
            driver,
            encoder,
            index,
            frames: HashMap::new(),
            picker,
            settings,
            current: None,
            generation: 0,
            animation: None,
            restore_timer: None,
            restore_tx,
        };
        let task = tokio::spawn(engine.run(rx, restore_rx));
        (DisplayHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<DisplayCommand>,
        mut restore_rx: mpsc::UnboundedReceiver<(u64, DisplayStatus)>,
    ) {
        info!("display: engine started");
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(DisplayCommand::ShowStatus(status)) => self.show_status(status).await,
                    Some(DisplayCommand::ShowCode { text, temporary }) => {
                        self.show_code(&text, temporary).await
                    }
                },
                Some((generation, target)) = restore_rx.recv() => {
                    self.restore(generation, target).await;
                }
            }
        }
        self.stop_animation().await;
        self.cancel_restore();
        info!("display: engine stopped");
    }

    async fn restore(&mut self, generation: u64, target: DisplayStatus) {
        if generation != self.generation {
            debug!(
                "display: stale restore (gen {} != {}) ignored",
                generation, self.generation
            );
            return;
        }
        debug!("display: restoring {}", target);
        self.show_status(target).await;
    }

    async fn show_status(&mut self, status: DisplayStatus) {
        if self.current == Some(status) {
            debug!("display: {} already showing", status);
            return;
        }
        let config = status.config(self.settings.transient_after);

        let frames = match self.load_random_variant(config.asset).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("display: cannot show {}: {}", status, e);
                return;
            }
        };

        self.stop_animation().await;
        self.cancel_restore();
        self.generation += 1;
        self.current = Some(status);
        info!("display: {} (gen {})", status, self.generation);

        if let RestorePolicy::Transient { after, target } = config.restore {
            self.arm_restore(Restore { after, target });
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(animate(
            Arc::clone(&self.driver),
            frames,
            config.refresh,
            cancel.clone(),
        ));
        self.animation = Some(AnimationLoop { cancel, task });
    }

    async fn show_code(&mut self, text: &str, temporary: Option<Restore>) {
        let png = match self.encoder.encode(text, self.settings.code_size) {
            Ok(png) => png,
            Err(e) => {
                warn!("display: cannot encode code image: {}", e);
                return;
            }
        };

        self.stop_animation().await;
        self.cancel_restore();
        self.generation += 1;
        self.current = Some(DisplayStatus::StaticImage);
        info!("display: code image for {:?} (gen {})", text, self.generation);

        if let Some(restore) = temporary {
            self.arm_restore(restore);
        }

        if let Err(e) = self.driver.fill_screen(BLACK) {
            warn!("display: fill failed: {}", e);
        }
        let mut reader = FrameReader::new(Arc::from(png));
        if let Err(e) = self.driver.draw_frame(&mut reader) {
            warn!("display: code draw failed: {}", e);
        }
    }

    async fn load_random_variant(&mut self, asset: &str) -> Result<Vec<Arc<[u8]>>, AssetError> {
        let variants = self.index.variants(asset);
        let variant = *self
            .picker
            .pick(&variants)
            .ok_or_else(|| AssetError::MissingAnimation(asset.to_string()))?;
        let key = (asset.to_string(), variant);
        if let Some(frames) = self.frames.get(&key) {
            return Ok(frames.clone());
        }

        let paths = self.index.frame_paths(asset, variant)?;
        let frames = tokio::task::spawn_blocking(move || read_frames(&paths)).await??;
        debug!("display: loaded {} frames for {}{}", frames.len(), asset, variant);
        self.frames.insert(key, frames.clone());
        Ok(frames)
    }

    /// Cancel the running loop and wait until it has drawn its last frame.
    async fn stop_animation(&mut self) {
        if let Some(animation) = self.animation.take() {
            animation.cancel.cancel();
            if let Err(e) = animation.task.await {
                warn!("display: animation task failed: {}", e);
            }
        }
    }

    fn cancel_restore(&mut self) {
        if let Some(timer) = self.restore_timer.take() {
            timer.abort();
        }
    }

    fn arm_restore(&mut self, restore: Restore) {
        let generation = self.generation;
        let tx = self.restore_tx.clone();
        self.restore_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(restore.after).await;
            let _ = tx.send((generation, restore.target));
        }));
    }
}

async fn animate(
    driver: Arc<dyn DisplayDriver>,
    frames: Vec<Arc<[u8]>>,
    refresh: Duration,
    cancel: CancellationToken,
) {
    let mut readers: Vec<FrameReader> = frames.into_iter().map(FrameReader::new).collect();
    if readers.is_empty() {
        return;
    }
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut i = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = driver.draw_frame(&mut readers[i]) {
                    warn!("display: frame draw failed: {}", e);
                }
                i = (i + 1) % readers.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct RecordingDriver {
        draws: Mutex<Vec<(Instant, Vec<u8>)>>,
        fills: Mutex<usize>,
    }

    impl RecordingDriver {
        fn draws_since(&self, from: usize) -> Vec<String> {
            self.draws.lock().unwrap()[from..]
                .iter()
                .map(|(_, b)| String::from_utf8_lossy(b).to_string())
                .collect()
        }

        fn count(&self) -> usize {
            self.draws.lock().unwrap().len()
        }
    }

    impl DisplayDriver for RecordingDriver {
        fn fill_screen(&self, _color: driver::Rgb) -> anyhow::Result<()> {
            *self.fills.lock().unwrap() += 1;
            Ok(())
        }

        fn draw_frame(&self, frame: &mut dyn Read) -> anyhow::Result<()> {
            let mut bytes = Vec::new();
            frame.read_to_end(&mut bytes)?;
            self.draws.lock().unwrap().push((Instant::now(), bytes));
            Ok(())
        }
    }

    struct EchoEncoder;

    impl CodeEncoder for EchoEncoder {
        fn encode(&self, text: &str, _size: u32) -> anyhow::Result<Vec<u8>> {
            Ok(format!("code:{}", text).into_bytes())
        }
    }

    fn asset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["play", "search", "error", "huh", "splash"] {
            for i in 0..3 {
                std::fs::write(
                    dir.path().join(format!("{}0_{:03}.gif", name, i)),
                    format!("{}:{}", name, i),
                )
                .unwrap();
            }
        }
        dir
    }

    fn spawn_engine(dir: &std::path::Path) -> (DisplayHandle, Arc<RecordingDriver>) {
        let driver = Arc::new(RecordingDriver::default());
        let (handle, _task) = DisplayEngine::spawn(
            driver.clone(),
            Arc::new(EchoEncoder),
            AnimationIndex::scan(dir).unwrap(),
            Picker::new(Some(7)),
            DisplaySettings {
                transient_after: Duration::from_secs(5),
                code_size: 240,
            },
        );
        (handle, driver)
    }

    fn all_from(draws: &[String], asset: &str) -> bool {
        !draws.is_empty() && draws.iter().all(|d| d.starts_with(asset))
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_stops_previous_animation() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Playing).await;
        sleep(Duration::from_secs(1)).await;
        assert!(all_from(&driver.draws_since(0), "play:"));

        display.show_status(DisplayStatus::Searching).await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();
        sleep(Duration::from_secs(2)).await;
        assert!(all_from(&driver.draws_since(mark), "search:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_cycle_in_order() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Playing).await;
        sleep(Duration::from_millis(650)).await;
        let draws = driver.draws_since(0);
        assert!(draws.len() >= 6);
        assert_eq!(&draws[..6], &["play:0", "play:1", "play:2", "play:0", "play:1", "play:2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_restores_to_playing() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Playing).await;
        sleep(Duration::from_millis(500)).await;
        display.show_status(DisplayStatus::Error).await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();
        sleep(Duration::from_secs(4)).await;
        assert!(all_from(&driver.draws_since(mark), "error:"));

        sleep(Duration::from_secs(2)).await;
        let mark = driver.count();
        sleep(Duration::from_secs(1)).await;
        assert!(all_from(&driver.draws_since(mark), "play:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_transient_does_not_restore() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Error).await;
        sleep(Duration::from_secs(2)).await;
        display.show_status(DisplayStatus::Searching).await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();

        // Well past the error's original five second restore
        sleep(Duration::from_secs(10)).await;
        assert!(all_from(&driver.draws_since(mark), "search:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_transient_gets_full_duration() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Error).await;
        sleep(Duration::from_secs(3)).await;
        display.show_status(DisplayStatus::Confused).await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();

        // 3s + 3s is past the first timer but inside the second
        sleep(Duration::from_secs(3)).await;
        assert!(all_from(&driver.draws_since(mark), "huh:"));

        sleep(Duration::from_secs(3)).await;
        let mark = driver.count();
        sleep(Duration::from_secs(1)).await;
        assert!(all_from(&driver.draws_since(mark), "play:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_asset_keeps_current_animation() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Playing).await;
        sleep(Duration::from_millis(500)).await;
        // No "identify" frames in the asset dir
        display.show_status(DisplayStatus::Identifying).await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();
        sleep(Duration::from_secs(1)).await;
        assert!(all_from(&driver.draws_since(mark), "play:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_image_then_restore() {
        let dir = asset_dir();
        let (display, driver) = spawn_engine(dir.path());

        display.show_status(DisplayStatus::Playing).await;
        sleep(Duration::from_millis(500)).await;
        display
            .show_code(
                "https://example.test/?q=song".to_string(),
                Some(Restore {
                    after: Duration::from_secs(60),
                    target: DisplayStatus::Playing,
                }),
            )
            .await;
        sleep(Duration::from_millis(10)).await;
        let mark = driver.count();
        assert_eq!(*driver.fills.lock().unwrap(), 1);

        sleep(Duration::from_secs(30)).await;
        // One static draw and nothing after it
        assert_eq!(
            driver.draws_since(mark - 1),
            vec!["code:https://example.test/?q=song".to_string()]
        );

        sleep(Duration::from_secs(31)).await;
        assert!(all_from(&driver.draws_since(mark), "play:"));
    }

    fn engine(dir: &std::path::Path, driver: Arc<RecordingDriver>) -> DisplayEngine {
        let (restore_tx, _restore_rx) = mpsc::unbounded_channel();
        DisplayEngine {
            driver,
            encoder: Arc::new(EchoEncoder),
            index: AnimationIndex::scan(dir).unwrap(),
            frames: HashMap::new(),
            picker: Picker::new(Some(1)),
            settings: DisplaySettings {
                transient_after: Duration::from_secs(5),
                code_size: 240,
            },
            current: None,
            generation: 0,
            animation: None,
            restore_timer: None,
            restore_tx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_status_is_noop() {
        let dir = asset_dir();
        let mut engine = engine(dir.path(), Arc::new(RecordingDriver::default()));

        engine.show_status(DisplayStatus::Playing).await;
        assert_eq!(engine.generation, 1);
        engine.show_status(DisplayStatus::Playing).await;
        assert_eq!(engine.generation, 1);
        engine.show_status(DisplayStatus::Searching).await;
        assert_eq!(engine.generation, 2);
        engine.stop_animation().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gapped_variants_are_all_playable() {
        let dir = asset_dir();
        for i in 0..2 {
            std::fs::write(dir.path().join(format!("play3_{:03}.gif", i)), format!("play3:{}", i))
                .unwrap();
        }
        let mut engine = engine(dir.path(), Arc::new(RecordingDriver::default()));

        for round in 1..=20u64 {
            engine.show_status(DisplayStatus::Playing).await;
            assert_eq!(engine.generation, 2 * round - 1);
            engine.show_status(DisplayStatus::Searching).await;
            assert_eq!(engine.generation, 2 * round);
        }
        engine.stop_animation().await;

        let mut shown: Vec<u32> = engine
            .frames
            .keys()
            .filter(|(asset, _)| asset == "play")
            .map(|(_, variant)| *variant)
            .collect();
        shown.sort_unstable();
        assert_eq!(shown, vec![0, 3]);
    }
}
