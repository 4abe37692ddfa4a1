mod core;
mod display;
mod input;
mod mixer;
mod pipeline;
mod session;
mod sink;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pirate_proto::config::{load_languages, Config, DriverKind};
use pirate_proto::favorites::JsonFavoritesStore;
use pirate_proto::identify::{AuddClient, Identifier};
use pirate_proto::library::{MusicLibrary, SpotifyLibrary};
use pirate_proto::pick::Picker;
use pirate_proto::platform;
use pirate_proto::search::RadioBrowser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{CoreEvent, Orchestrator, Services};
use crate::display::assets::AnimationIndex;
use crate::display::code::QrEncoder;
use crate::display::driver::{DisplayDriver, FramebufferDriver, LogDriver};
use crate::display::{DisplayEngine, DisplaySettings};
use crate::input::{spawn_button, Button, InputTiming, SysfsPin};
use crate::mixer::{Amixer, VolumeControl};
use crate::pipeline::FfmpegPipeline;
use crate::sink::{SampleRecorder, Speaker};

fn init_logging(log_path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    // Create layers: file writer + stderr for the service journal
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,pirate_radio=debug")),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(&config.paths.log_file)?;
    info!("Log file: {:?}", config.paths.log_file);
    info!("Config loaded from: {:?}", Config::config_path());

    let mut picker = Picker::new(config.seed);

    // Everything below is required; any failure here ends the process
    if !config.paths.assets_dir.is_dir() {
        anyhow::bail!(
            "assets directory {} does not exist",
            config.paths.assets_dir.display()
        );
    }
    let index = AnimationIndex::scan(&config.paths.assets_dir)?;
    let languages = load_languages(&config.paths.languages_file)
        .with_context(|| format!("loading {}", config.paths.languages_file.display()))?;
    info!("{} search languages", languages.len());
    let ffmpeg = platform::find_ffmpeg_binary().context("ffmpeg not found")?;
    let aplay = platform::find_aplay_binary().context("aplay not found")?;

    let driver: Arc<dyn DisplayDriver> = match config.display.driver {
        DriverKind::Framebuffer => Arc::new(FramebufferDriver::open(
            config.display.framebuffer.clone(),
            config.display.width,
            config.display.height,
        )?),
        DriverKind::Log => Arc::new(LogDriver::new()),
    };
    let (display, _display_task) = DisplayEngine::spawn(
        driver,
        Arc::new(QrEncoder),
        index,
        picker.fork(),
        DisplaySettings {
            transient_after: Duration::from_secs(config.display.transient_secs),
            code_size: config.display.code_size,
        },
    );

    let speaker = Arc::new(Speaker::start(
        aplay,
        ffmpeg.clone(),
        config.paths.sample_file.clone(),
        Duration::from_secs(config.identify.sample_secs),
        &config.audio,
    )?);
    let pipeline = Arc::new(FfmpegPipeline::new(ffmpeg, &config.audio, &config.stream));
    let search = Arc::new(RadioBrowser::new(&config.search, languages, picker.fork())?);

    // Optional features
    let identifier: Option<Arc<dyn Identifier>> = match config.identify.resolve_token() {
        Some(token) => {
            info!("[IDENTIFY] enabled");
            Some(Arc::new(AuddClient::new(&config.identify.gateway, token)?))
        }
        None => {
            info!("[IDENTIFY] disabled: no API token");
            None
        }
    };
    let library: Option<Arc<dyn MusicLibrary>> = match (
        config.library.client_id.clone(),
        config.library.client_secret.clone(),
        config.library.resolve_refresh_token(),
    ) {
        (Some(id), Some(secret), Some(refresh)) => {
            info!("[LIBRARY] enabled");
            Some(Arc::new(SpotifyLibrary::new(id, secret, refresh)?))
        }
        _ => {
            info!("[LIBRARY] disabled: credentials incomplete");
            None
        }
    };
    let mixer: Option<Arc<dyn VolumeControl>> = platform::find_amixer_binary()
        .map(|p| Arc::new(Amixer::new(p)) as Arc<dyn VolumeControl>);
    if let Some(m) = &mixer {
        if let Err(e) = m.set_muted(false).await {
            warn!("mixer: initial volume failed: {}", e);
        }
    }

    // Buttons
    let (input_tx, input_rx) = mpsc::channel(16);
    let timing = InputTiming {
        debounce: config.input.debounce(),
        hold_sample: config.input.hold_sample(),
    };
    let mute_pin = config.input.mute_pin.filter(|_| mixer.is_some());
    let buttons = [
        (Button::Random, Some(config.input.random_pin), true),
        (Button::Favorite, Some(config.input.favorite_pin), true),
        (Button::Mute, mute_pin, false),
    ];
    for (button, number, with_hold) in buttons {
        let Some(number) = number else { continue };
        match SysfsPin::open(&config.input.gpio_root, number, config.input.poll()) {
            Ok(pin) => {
                spawn_button(button, Arc::new(pin), with_hold, timing, input_tx.clone());
            }
            Err(e) => warn!("input: {:?} button unavailable: {}", button, e),
        }
    }
    drop(input_tx);

    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(64);
    let (session_tx, session_rx) = mpsc::channel(64);

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = shutdown_tx.send(CoreEvent::Shutdown).await;
        }
    });

    let services = Services {
        search,
        pipeline,
        sink: speaker.clone(),
        favorites: Arc::new(JsonFavoritesStore::new(config.paths.favorites_file.clone())),
        recorder: identifier
            .as_ref()
            .map(|_| speaker.clone() as Arc<dyn SampleRecorder>),
        identifier,
        library,
        mixer,
    };
    let core = Orchestrator::new(&config, services, display, picker, event_tx, session_tx);
    core.run(input_rx, event_rx, session_rx).await?;

    info!("pirate-radio stopped");
    Ok(())
}
