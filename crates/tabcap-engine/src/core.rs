//! Engine core: the single owner of all session state.
//!
//! Commands from every surface funnel into one mpsc queue and are handled
//! here one at a time, so per-tab mutations are serialized without locks on
//! the hot path.  Results fan out on a broadcast channel; a read-only state
//! mirror serves surfaces that want the latest snapshot without a round
//! trip through the queue.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use tabcap_proto::config::Config;
use tabcap_proto::prefs::PrefsStore;
use tabcap_proto::protocol::{Command, EngineState, TabId, VisualFrame, MAX_CAP};

use crate::control_loop::{ControlLoop, IntervalClock};
use crate::controller::{GainController, RESTING_GAIN};
use crate::error::EngineError;
use crate::graph::AudioGraph;
use crate::session::SessionStore;
use crate::stream::{NullSink, StreamBroker};

/// Events feeding the core's event loop.
#[derive(Debug)]
pub enum EngineEvent {
    ClientCommand(Command),
    /// A control loop exited on its own (stream ended or failed).
    LoopEnded { tab_id: TabId, reason: String },
    Shutdown,
}

/// Fan-out to every connected surface.
#[derive(Debug, Clone)]
pub enum EngineBroadcast {
    StateUpdated(EngineState),
    Badge { tab_id: TabId, text: String },
    Visual(Arc<VisualFrame>),
    Log(String),
    Error(String),
}

pub struct EngineCore {
    config: Config,
    sessions: SessionStore,
    broker: Arc<dyn StreamBroker>,
    prefs: PrefsStore,
    controller: GainController,
    state: Arc<RwLock<EngineState>>,
    broadcast_tx: broadcast::Sender<EngineBroadcast>,
    event_tx: mpsc::Sender<EngineEvent>,
    rev: u64,
}

impl EngineCore {
    pub fn new(
        config: Config,
        broker: Arc<dyn StreamBroker>,
        prefs: PrefsStore,
        broadcast_tx: broadcast::Sender<EngineBroadcast>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            broker,
            prefs,
            controller: GainController::default(),
            state: Arc::new(RwLock::new(EngineState::default())),
            broadcast_tx,
            event_tx,
            rev: 0,
        }
    }

    /// Handle to the read-only state mirror, for surfaces that serve
    /// snapshots directly (socket hello, HTTP GET).
    pub fn state_handle(&self) -> Arc<RwLock<EngineState>> {
        Arc::clone(&self.state)
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) {
        info!("EngineCore: event loop running");
        while let Some(event) = event_rx.recv().await {
            match event {
                EngineEvent::ClientCommand(command) => self.handle_command(command).await,
                EngineEvent::LoopEnded { tab_id, reason } => {
                    self.handle_loop_ended(tab_id, reason).await
                }
                EngineEvent::Shutdown => {
                    info!("EngineCore: shutdown requested");
                    break;
                }
            }
        }
        self.sessions.stop_all().await;
        info!("EngineCore: event loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!("EngineCore: command {:?}", command);
        match command {
            Command::Start { tab_id, stream_id } => self.start_capture(tab_id, stream_id).await,
            Command::Stop { tab_id } => self.stop_capture(tab_id).await,
            Command::SetCap { tab_id, cap } => self.set_cap(tab_id, cap).await,
            Command::ToggleVisual { tab_id, hidden } => self.toggle_visual(tab_id, hidden).await,
            Command::Remove { tab_id } => self.remove_tab(tab_id).await,
            Command::GetState => self.sync_state().await,
        }
    }

    async fn start_capture(&mut self, tab_id: TabId, stream_id: String) {
        let stored = self.prefs.get(tab_id);
        let session = self.sessions.entry(tab_id, stored);
        session.stop_capture().await;

        let opened = self
            .broker
            .acquire(&stream_id)
            .and_then(|stream| AudioGraph::open(stream, Box::new(NullSink), RESTING_GAIN));

        match opened {
            Ok(graph) => {
                let control_loop = ControlLoop::start(
                    tab_id,
                    graph,
                    session.controls(),
                    self.controller,
                    IntervalClock::new(self.config.engine.frame_rate_hz),
                    self.event_tx.clone(),
                    self.broadcast_tx.clone(),
                );
                session.prefs.enabled = true;
                session.attach_capture(stream_id.clone(), control_loop);
                info!("EngineCore: tab {} capturing from '{}'", tab_id, stream_id);
            }
            Err(e) => {
                session.prefs.enabled = false;
                warn!(
                    "EngineCore: tab {} could not start '{}': {}",
                    tab_id, stream_id, e
                );
                let _ = self
                    .broadcast_tx
                    .send(EngineBroadcast::Error(format!("tab {}: {}", tab_id, e)));
            }
        }

        self.persist_tab(tab_id).await;
        self.publish_state().await;
        self.publish_badge(tab_id);
    }

    async fn stop_capture(&mut self, tab_id: TabId) {
        match self.sessions.get_mut(tab_id) {
            Some(session) => {
                session.stop_capture().await;
                session.prefs.enabled = false;
                info!("EngineCore: tab {} capture stopped", tab_id);
                self.persist_tab(tab_id).await;
                self.publish_state().await;
                self.publish_badge(tab_id);
            }
            None => {
                debug!("EngineCore: stop for unknown tab {}", tab_id);
                self.sync_state().await;
            }
        }
    }

    async fn set_cap(&mut self, tab_id: TabId, cap: u16) {
        if cap > MAX_CAP {
            let err = EngineError::InvalidCap(cap);
            warn!("EngineCore: tab {}: {}", tab_id, err);
            let _ = self
                .broadcast_tx
                .send(EngineBroadcast::Error(err.to_string()));
            return;
        }
        let stored = self.prefs.get(tab_id);
        let session = self.sessions.entry(tab_id, stored);
        session.set_cap(cap as u8);
        debug!("EngineCore: tab {} cap set to {}", tab_id, cap);
        self.persist_tab(tab_id).await;
        self.publish_state().await;
        self.publish_badge(tab_id);
    }

    async fn toggle_visual(&mut self, tab_id: TabId, hidden: bool) {
        let stored = self.prefs.get(tab_id);
        let session = self.sessions.entry(tab_id, stored);
        session.set_visual_hidden(hidden);
        debug!("EngineCore: tab {} visuals hidden={}", tab_id, hidden);
        self.persist_tab(tab_id).await;
        self.publish_state().await;
    }

    /// Tab closed: forget the session and its stored prefs.  Browsers close
    /// tabs the engine never captured from, so an unknown tab is a no-op.
    async fn remove_tab(&mut self, tab_id: TabId) {
        let existed = self.sessions.remove(tab_id).await;
        if let Err(e) = self.prefs.remove(tab_id).await {
            error!(
                "EngineCore: failed to drop prefs for tab {}: {:#}",
                tab_id, e
            );
        }
        if existed {
            info!("EngineCore: tab {} removed", tab_id);
            self.publish_state().await;
        } else {
            debug!("EngineCore: remove for unknown tab {}", tab_id);
            self.sync_state().await;
        }
        // The badge outlives the session record on the extension side.
        let _ = self.broadcast_tx.send(EngineBroadcast::Badge {
            tab_id,
            text: String::new(),
        });
    }

    async fn handle_loop_ended(&mut self, tab_id: TabId, reason: String) {
        let Some(session) = self.sessions.get_mut(tab_id) else {
            return;
        };
        session.stop_capture().await;
        session.prefs.enabled = false;
        info!("EngineCore: tab {} capture ended: {}", tab_id, reason);
        let _ = self.broadcast_tx.send(EngineBroadcast::Log(format!(
            "tab {}: capture ended: {}",
            tab_id, reason
        )));
        self.persist_tab(tab_id).await;
        self.publish_state().await;
        self.publish_badge(tab_id);
    }

    async fn persist_tab(&mut self, tab_id: TabId) {
        let Some(session) = self.sessions.get(tab_id) else {
            return;
        };
        let prefs = session.prefs;
        if let Err(e) = self.prefs.set(tab_id, prefs).await {
            error!(
                "EngineCore: failed to persist prefs for tab {}: {:#}",
                tab_id, e
            );
        }
    }

    /// Bump the revision and publish.  Every state mutation ends here.
    async fn publish_state(&mut self) {
        self.rev += 1;
        self.sync_state().await;
    }

    /// Publish the current state without bumping the revision.
    async fn sync_state(&self) {
        let snapshot = EngineState {
            rev: self.rev,
            sessions: self.sessions.snapshots(),
        };
        *self.state.write().await = snapshot.clone();
        let _ = self
            .broadcast_tx
            .send(EngineBroadcast::StateUpdated(snapshot));
    }

    fn publish_badge(&self, tab_id: TabId) {
        let Some(session) = self.sessions.get(tab_id) else {
            return;
        };
        let text = session.snapshot().badge_text();
        let _ = self
            .broadcast_tx
            .send(EngineBroadcast::Badge { tab_id, text });
    }
}
