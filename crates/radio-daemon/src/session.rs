//! Stream sessions.
//!
//! A session is one decoder process feeding the sink.  Starting a new one
//! never interrupts the old one early: the previous session is stopped
//! only when the new decoder delivers its first chunk of audio.  If that
//! does not happen within the start timeout the attempt is abandoned and
//! the previous session keeps playing.
//!
//! Once started, a monitor watches the session and reports it dead when
//! data stops arriving or when the decoder reports prolonged silence.

use pirate_proto::config::StreamConfig;
use pirate_proto::protocol::Station;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{DecodePipeline, DecodeProcess, NoProcess, ProcessControl, SilenceMarker};
use crate::sink::AudioSink;

pub type SessionId = u64;

const CHUNK_SIZE: usize = 8 * 1024;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub start_timeout: Duration,
    pub stall_after: Duration,
    pub stall_poll: Duration,
    pub max_silence: Duration,
}

impl From<&StreamConfig> for SessionTimings {
    fn from(cfg: &StreamConfig) -> Self {
        Self {
            start_timeout: cfg.start_timeout(),
            stall_after: cfg.stall_after(),
            stall_poll: cfg.stall_poll(),
            max_silence: cfg.max_silence(),
        }
    }
}

/// Cloneable reference to a running (or failed) session.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub station: Station,
    control: Arc<dyn ProcessControl>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Stop the pump and monitor and kill the decoder.  Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.control.kill();
    }

    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && self.control.is_alive()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("station", &self.station.name)
            .finish()
    }
}

/// Outcome of a start attempt.
pub struct StreamSession {
    pub handle: SessionHandle,
    pub started: bool,
    last_data: Arc<Mutex<Instant>>,
    markers: Option<mpsc::Receiver<SilenceMarker>>,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("handle", &self.handle)
            .field("started", &self.started)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadReason {
    Stalled,
    Silent,
}

#[derive(Debug)]
pub enum SessionEvent {
    /// A start attempt finished, successfully or not.
    Ready(StreamSession),
    /// The decoder reported silence; the session is still alive.
    Quiet(SessionId),
    /// Audio came back after `Quiet`.
    Resumed(SessionId),
    /// The monitor gave up on the session and stopped it.
    Dead { id: SessionId, reason: DeadReason },
}

/// Launch `station` and wait for its first audio, stopping `previous` at
/// that moment.  Always resolves; check `started` on the result.
pub async fn start_session(
    id: SessionId,
    station: Station,
    previous: Option<SessionHandle>,
    pipeline: Arc<dyn DecodePipeline>,
    sink: Arc<dyn AudioSink>,
    start_timeout: Duration,
) -> StreamSession {
    let cancel = CancellationToken::new();
    info!("session {}: starting {} ({})", id, station.name, station.url);

    let process = match pipeline.launch(&station.url).await {
        Ok(p) => p,
        Err(e) => {
            warn!("session {}: launch failed: {}", id, e);
            cancel.cancel();
            return StreamSession {
                handle: SessionHandle {
                    id,
                    station,
                    control: Arc::new(NoProcess),
                    cancel,
                },
                started: false,
                last_data: Arc::new(Mutex::new(Instant::now())),
                markers: None,
            };
        }
    };
    let DecodeProcess {
        audio,
        markers,
        control,
    } = process;

    let handle = SessionHandle {
        id,
        station,
        control,
        cancel,
    };
    let state = Arc::new(AtomicU8::new(PENDING));
    let last_data = Arc::new(Mutex::new(Instant::now()));
    let (first_tx, first_rx) = oneshot::channel();

    tokio::spawn(pump(
        handle.clone(),
        audio,
        sink,
        Arc::clone(&state),
        previous,
        first_tx,
        Arc::clone(&last_data),
    ));

    tokio::pin!(first_rx);
    let started = tokio::select! {
        res = &mut first_rx => res.is_ok(),
        _ = sleep(start_timeout) => {
            if state
                .compare_exchange(PENDING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                warn!("session {}: no audio within {:?}", id, start_timeout);
                false
            } else {
                // The pump got there first; its signal is on the way
                (&mut first_rx).await.is_ok()
            }
        }
    };

    if started {
        info!("session {}: playing {}", id, handle.station.name);
    } else {
        handle.stop();
    }
    StreamSession {
        handle,
        started,
        last_data,
        markers: Some(markers),
    }
}

async fn pump(
    handle: SessionHandle,
    mut audio: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
    sink: Arc<dyn AudioSink>,
    state: Arc<AtomicU8>,
    mut previous: Option<SessionHandle>,
    first_tx: oneshot::Sender<()>,
    last_data: Arc<Mutex<Instant>>,
) {
    let mut first_tx = Some(first_tx);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = tokio::select! {
            _ = handle.cancel.cancelled() => break,
            res = audio.read(&mut buf) => match res {
                Ok(0) => {
                    info!("session {}: stream ended", handle.id);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("session {}: read failed: {}", handle.id, e);
                    break;
                }
            },
        };

        if let Some(tx) = first_tx.take() {
            if state
                .compare_exchange(PENDING, STARTED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                debug!("session {}: first audio after the start was abandoned", handle.id);
                return;
            }
            if let Some(prev) = previous.take() {
                info!("session {}: handing over from session {}", handle.id, prev.id);
                prev.stop();
            }
            let _ = tx.send(());
        }

        if let Ok(mut t) = last_data.lock() {
            *t = Instant::now();
        }
        sink.write(&buf[..n]);
    }
}

impl StreamSession {
    /// Start watching a started session.  Events go to `events`; the
    /// monitor ends when the session is stopped.
    pub fn spawn_monitor(
        mut self,
        timings: SessionTimings,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let handle = self.handle.clone();
        tokio::spawn(monitor(
            self.handle,
            self.last_data,
            self.markers.take(),
            timings,
            events,
        ));
        handle
    }
}

async fn next_marker(markers: &mut Option<mpsc::Receiver<SilenceMarker>>) -> Option<SilenceMarker> {
    match markers {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn monitor(
    handle: SessionHandle,
    last_data: Arc<Mutex<Instant>>,
    mut markers: Option<mpsc::Receiver<SilenceMarker>>,
    timings: SessionTimings,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut poll = interval_at(Instant::now() + timings.stall_poll, timings.stall_poll);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut silent_until: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => {
                debug!("session {}: monitor stopped", handle.id);
                return;
            }
            _ = poll.tick() => {
                let idle = last_data.lock().map(|t| t.elapsed()).unwrap_or_default();
                if idle >= timings.stall_after {
                    warn!("session {}: no data for {:?}", handle.id, idle);
                    break DeadReason::Stalled;
                }
            }
            marker = next_marker(&mut markers) => match marker {
                Some(SilenceMarker::Start) => {
                    info!("session {}: silence started", handle.id);
                    if silent_until.is_none() {
                        silent_until = Some(Instant::now() + timings.max_silence);
                    }
                    let _ = events.send(SessionEvent::Quiet(handle.id)).await;
                }
                Some(SilenceMarker::End) => {
                    info!("session {}: silence ended", handle.id);
                    silent_until = None;
                    let _ = events.send(SessionEvent::Resumed(handle.id)).await;
                }
                None => markers = None,
            },
            _ = sleep_until(silent_until.unwrap_or_else(Instant::now)), if silent_until.is_some() => {
                warn!("session {}: silent for {:?}", handle.id, timings.max_silence);
                break DeadReason::Silent;
            }
        }
    };

    handle.stop();
    let _ = events
        .send(SessionEvent::Dead {
            id: handle.id,
            reason,
        })
        .await;
}
