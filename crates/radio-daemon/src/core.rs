/// Orchestrator: single-owner event loop for all appliance state.
///
/// Button presses, session lifecycle events and results from background
/// workers all arrive on queues read only by this loop.  It owns the
/// current session handle, the favorites list and the busy flag; no other
/// task touches them.  Anything slow (searching, recording, network calls,
/// starting a stream) runs in a spawned worker that reports back with an
/// event.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use pirate_proto::config::{Config, StreamConfig};
use pirate_proto::error::{LibraryError, SearchError};
use pirate_proto::favorites::{Favorites, FavoritesStore};
use pirate_proto::identify::Identifier;
use pirate_proto::library::MusicLibrary;
use pirate_proto::pick::Picker;
use pirate_proto::protocol::{DisplayStatus, Station, Track};
use pirate_proto::search::{find_distinct, StationSearch};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::display::{DisplayHandle, Restore};
use crate::input::{Button, InputEvent, PressKind};
use crate::mixer::VolumeControl;
use crate::pipeline::DecodePipeline;
use crate::session::{
    start_session, SessionEvent, SessionHandle, SessionId, SessionTimings, StreamSession,
};
use crate::sink::{AudioSink, SampleRecorder};

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// Results from background workers.
#[derive(Debug)]
pub enum CoreEvent {
    SearchDone(Result<Station, SearchError>),
    FavoriteSaved {
        station: Station,
        result: Result<(), String>,
    },
    Identified(Track),
    LibraryDone(Result<(), LibraryError>),
    MuteSet {
        muted: bool,
        result: Result<(), String>,
    },
    /// Backoff elapsed after a failed start.
    RetryRandom,
    Shutdown,
}

/// Everything the orchestrator talks to.  Optional services are disabled
/// features.
pub struct Services {
    pub search: Arc<dyn StationSearch>,
    pub pipeline: Arc<dyn DecodePipeline>,
    pub sink: Arc<dyn AudioSink>,
    pub favorites: Arc<dyn FavoritesStore>,
    pub recorder: Option<Arc<dyn SampleRecorder>>,
    pub identifier: Option<Arc<dyn Identifier>>,
    pub library: Option<Arc<dyn MusicLibrary>>,
    pub mixer: Option<Arc<dyn VolumeControl>>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Orchestrator {
    services: Services,
    display: DisplayHandle,
    picker: Picker,
    favorites: Favorites,
    stream: StreamConfig,
    timings: SessionTimings,
    search_attempts: u32,
    code_restore: Duration,
    web_search_url: String,
    web_search_param: String,
    event_tx: mpsc::Sender<CoreEvent>,
    session_tx: mpsc::Sender<SessionEvent>,
    /// The session that is playing (or was, until it died).
    current: Option<SessionHandle>,
    /// A station switch is in flight; further switch requests are dropped.
    busy: bool,
    identifying: bool,
    /// Favorite being written right now; at most one save runs at a time.
    saving: Option<Station>,
    /// Holds that arrived while a save was running.
    save_queue: VecDeque<Station>,
    /// Level last confirmed by the mixer.
    muted: bool,
    next_session: SessionId,
    /// Consecutive failed starts, for retry backoff.
    failures: u32,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        services: Services,
        display: DisplayHandle,
        picker: Picker,
        event_tx: mpsc::Sender<CoreEvent>,
        session_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let favorites = Favorites::new(services.favorites.load());
        info!("core: {} favorites loaded", favorites.len());
        Self {
            services,
            display,
            picker,
            favorites,
            stream: config.stream.clone(),
            timings: SessionTimings::from(&config.stream),
            search_attempts: config.search.max_attempts,
            code_restore: Duration::from_secs(config.display.code_secs),
            web_search_url: config.display.web_search_url.clone(),
            web_search_param: config.display.web_search_param.clone(),
            event_tx,
            session_tx,
            current: None,
            busy: false,
            identifying: false,
            saving: None,
            save_queue: VecDeque::new(),
            muted: false,
            next_session: 0,
            failures: 0,
        }
    }

    /// Run until `Shutdown`.  Shows the splash and starts a random favorite
    /// first.
    pub async fn run(
        mut self,
        mut input_rx: mpsc::Receiver<InputEvent>,
        mut event_rx: mpsc::Receiver<CoreEvent>,
        mut session_rx: mpsc::Receiver<SessionEvent>,
    ) -> anyhow::Result<()> {
        info!("core: starting event loop");
        self.boot().await;

        loop {
            tokio::select! {
                Some(input) = input_rx.recv() => {
                    debug!("core: input {:?}", input);
                    self.handle_input(input).await;
                }
                Some(evt) = session_rx.recv() => self.handle_session(evt).await,
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("core: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Shutdown) => {
                        info!("core: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt).await,
                },
            }
        }

        if let Some(session) = self.current.take() {
            session.stop();
        }
        Ok(())
    }

    async fn boot(&mut self) {
        self.display.show_status(DisplayStatus::Splash).await;
        let Some(station) = self.picker.pick(self.favorites.as_slice()).cloned() else {
            warn!("core: no favorites to start with");
            return;
        };
        info!("core: starting with favorite {}", station.name);
        self.busy = true;
        self.start(station);
    }

    fn current_station(&self) -> Option<&Station> {
        self.current.as_ref().map(|s| &s.station)
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.current.as_ref().map_or(false, |s| s.id == id)
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    async fn handle_input(&mut self, input: InputEvent) {
        match (input.button, input.kind) {
            (Button::Random, PressKind::Press) => self.play_random().await,
            (Button::Random, PressKind::Hold) => self.identify_song().await,
            (Button::Favorite, PressKind::Press) => self.play_favorite().await,
            (Button::Favorite, PressKind::Hold) => self.save_favorite().await,
            (Button::Mute, _) => self.toggle_mute(),
        }
    }

    async fn play_random(&mut self) {
        if self.busy {
            info!("core: [BUSY] random station request dropped");
            return;
        }
        self.busy = true;
        self.display.show_status(DisplayStatus::Searching).await;

        let search = Arc::clone(&self.services.search);
        let exclude = self.current_station().map(|s| s.id.clone());
        let attempts = self.search_attempts;
        let tx = self.event_tx.clone();
        info!("core: searching for a random station");
        tokio::spawn(async move {
            let result = find_distinct(search.as_ref(), exclude.as_deref(), attempts).await;
            let _ = tx.send(CoreEvent::SearchDone(result)).await;
        });
    }

    async fn play_favorite(&mut self) {
        if self.busy {
            info!("core: [BUSY] favorite request dropped");
            return;
        }
        let others = self.favorites.others(self.current_station());
        let Some(station) = self.picker.pick(&others).cloned() else {
            info!("core: no other favorite to switch to");
            self.display.show_status(DisplayStatus::Confused).await;
            return;
        };
        self.busy = true;
        self.display.show_status(DisplayStatus::PlayingFavorite).await;
        self.start(station);
    }

    async fn save_favorite(&mut self) {
        let Some(station) = self.current_station().cloned() else {
            info!("core: nothing playing, no favorite to save");
            return;
        };
        let pending = self
            .saving
            .iter()
            .chain(self.save_queue.iter())
            .any(|s| s.name == station.name);
        if pending || self.favorites.contains_name(&station.name) {
            info!("core: {} is already a favorite", station.name);
            self.display.show_status(DisplayStatus::AddingFavorite).await;
            return;
        }
        self.save_queue.push_back(station);
        self.save_next();
    }

    /// Write the next queued favorite on top of the last saved list.
    fn save_next(&mut self) {
        if self.saving.is_some() {
            return;
        }
        let Some(station) = self.save_queue.pop_front() else {
            return;
        };
        let mut updated = self.favorites.clone();
        updated.insert(station.clone());
        self.saving = Some(station.clone());

        let store = Arc::clone(&self.services.favorites);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let stations = updated.into_vec();
            let result = tokio::task::spawn_blocking(move || store.save(&stations))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r.map_err(|e| e.to_string()));
            let _ = tx.send(CoreEvent::FavoriteSaved { station, result }).await;
        });
    }

    async fn identify_song(&mut self) {
        let (Some(recorder), Some(identifier)) = (
            self.services.recorder.clone(),
            self.services.identifier.clone(),
        ) else {
            debug!("core: identification disabled");
            return;
        };
        if self.identifying {
            info!("core: identification already running");
            return;
        }
        self.identifying = true;
        self.display.show_status(DisplayStatus::Identifying).await;

        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let track = match recorder.record_sample().await {
                Ok(path) => match identifier.identify(&path).await {
                    Ok(track) => track,
                    Err(e) => {
                        warn!("core: identification failed: {}", e);
                        Track::failed()
                    }
                },
                Err(e) => {
                    warn!("core: sample recording failed: {}", e);
                    Track::failed()
                }
            };
            let _ = tx.send(CoreEvent::Identified(track)).await;
        });
    }

    fn toggle_mute(&mut self) {
        let Some(mixer) = self.services.mixer.clone() else {
            debug!("core: no mixer configured");
            return;
        };
        let muted = !self.muted;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = mixer.set_muted(muted).await.map_err(|e| e.to_string());
            let _ = tx.send(CoreEvent::MuteSet { muted, result }).await;
        });
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    fn start(&mut self, station: Station) {
        self.next_session += 1;
        let id = self.next_session;
        let previous = self.current.clone();
        let pipeline = Arc::clone(&self.services.pipeline);
        let sink = Arc::clone(&self.services.sink);
        let timeout = self.timings.start_timeout;
        let tx = self.session_tx.clone();
        tokio::spawn(async move {
            let session = start_session(id, station, previous, pipeline, sink, timeout).await;
            let _ = tx.send(SessionEvent::Ready(session)).await;
        });
    }

    async fn handle_session(&mut self, evt: SessionEvent) {
        match evt {
            SessionEvent::Ready(session) => self.on_ready(session).await,
            SessionEvent::Quiet(id) if self.is_current(id) => {
                self.display.show_status(DisplayStatus::Confused).await;
            }
            SessionEvent::Resumed(id) if self.is_current(id) => {
                self.display.show_status(DisplayStatus::Playing).await;
            }
            SessionEvent::Dead { id, reason } if self.is_current(id) => {
                warn!("core: session {} dead ({:?}), finding another station", id, reason);
                self.play_random().await;
            }
            other => debug!("core: stale session event {:?}", other),
        }
    }

    async fn on_ready(&mut self, session: StreamSession) {
        self.busy = false;
        if session.started {
            self.failures = 0;
            if let Some(old) = self.current.take() {
                old.stop();
            }
            let handle = session.spawn_monitor(self.timings, self.session_tx.clone());
            info!("core: [ SET ] {}", handle.station.name);
            self.current = Some(handle);
            self.display.show_status(DisplayStatus::Playing).await;
            return;
        }

        self.failures += 1;
        let alive = self.current.as_ref().map_or(false, |s| s.is_alive());
        if alive {
            warn!(
                "core: {} did not start, keeping the current station",
                session.handle.station.name
            );
            self.display.show_status(DisplayStatus::Error).await;
            return;
        }

        warn!(
            "core: {} did not start and nothing is playing (failure #{})",
            session.handle.station.name, self.failures
        );
        match self.stream.retry_delay(self.failures) {
            None => self.play_random().await,
            Some(delay) => {
                info!("core: retrying in {:?}", delay);
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(CoreEvent::RetryRandom).await;
                });
            }
        }
    }

    // ── Worker results ────────────────────────────────────────────────────────

    async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::SearchDone(Ok(station)) => {
                info!("core: found {} [{}]", station.name, station.tags);
                self.start(station);
            }
            CoreEvent::SearchDone(Err(e)) => {
                warn!("core: search failed: {}", e);
                self.busy = false;
                self.display.show_status(DisplayStatus::Error).await;
            }
            CoreEvent::FavoriteSaved { station, result } => {
                self.saving = None;
                match result {
                    Ok(()) => {
                        self.favorites.insert(station.clone());
                        info!(
                            "core: [{}] favorite added: {}",
                            self.favorites.len(),
                            station.name
                        );
                        self.display.show_status(DisplayStatus::AddingFavorite).await;
                    }
                    Err(e) => {
                        error!("core: failed to save favorite {}: {}", station.name, e);
                        self.display.show_status(DisplayStatus::Error).await;
                    }
                }
                self.save_next();
            }
            CoreEvent::Identified(track) => self.on_identified(track).await,
            CoreEvent::LibraryDone(Ok(())) => {
                self.display.show_status(DisplayStatus::Success).await;
            }
            CoreEvent::LibraryDone(Err(e)) => {
                warn!("core: library add failed: {}", e);
                self.display.show_status(DisplayStatus::Error).await;
            }
            CoreEvent::MuteSet { muted, result } => match result {
                Ok(()) => self.muted = muted,
                Err(e) => warn!("core: mute toggle failed: {}", e),
            },
            CoreEvent::RetryRandom => self.play_random().await,
            CoreEvent::Shutdown => {}
        }
    }

    async fn on_identified(&mut self, track: Track) {
        self.identifying = false;
        if !track.ok {
            self.display.show_status(DisplayStatus::Confused).await;
            return;
        }

        if let (Some(library), Some(id)) = (self.services.library.clone(), track.provider_id.clone())
        {
            info!("core: saving {} - {} to library", track.title, track.artist);
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let result = library.add_to_library(&id).await;
                let _ = tx.send(CoreEvent::LibraryDone(result)).await;
            });
            return;
        }

        match reqwest::Url::parse_with_params(
            &self.web_search_url,
            &[(self.web_search_param.as_str(), track.search_query())],
        ) {
            Ok(url) => {
                info!("core: showing search code for {}", track.search_query());
                self.display
                    .show_code(
                        url.to_string(),
                        Some(Restore {
                            after: self.code_restore,
                            target: DisplayStatus::Playing,
                        }),
                    )
                    .await;
            }
            Err(e) => {
                warn!("core: bad web search url {}: {}", self.web_search_url, e);
                self.display.show_status(DisplayStatus::Error).await;
            }
        }
    }
}
