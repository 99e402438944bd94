//! App — terminal front end over an in-process engine.
//!
//! One mpsc channel carries everything into the loop: terminal events from a
//! blocking reader task and engine broadcasts from a forwarder task.  The
//! loop drains bursts (spectrum frames arrive at the control-tick rate),
//! redraws once per batch, and sends commands out through the engine's event
//! channel.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Frame, Terminal,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use tabcap_engine::core::{EngineBroadcast, EngineEvent};
use tabcap_proto::protocol::{Command, EngineState, SessionSnapshot, TabId, VisualFrame, MAX_CAP};

use crate::components::{session_list, spectrum_panel, status_bar};

enum AppMessage {
    Event(Event),
    StateUpdated(EngineState),
    Visual(Arc<VisualFrame>),
    Log(String),
}

/// Demo sources `s` and `n` cycle through.
const DEMO_STREAMS: &[&str] = &["sine:440", "noise", "step:0.1,0.8,1500", "silence"];

const CAP_STEP: u16 = 5;
const MAX_DRAIN: usize = 256;

pub struct App {
    state: EngineState,
    /// Latest spectrum frame per tab; replaced in place every tick.
    frames: HashMap<TabId, Arc<VisualFrame>>,
    selected: usize,
    /// Tab to select once it shows up in the next state broadcast.
    pending_select: Option<TabId>,
    last_log: Option<String>,
    next_demo: usize,
    event_tx: mpsc::Sender<EngineEvent>,
    should_quit: bool,
}

impl App {
    pub fn new(event_tx: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            state: EngineState::default(),
            frames: HashMap::new(),
            selected: 0,
            pending_select: None,
            last_log: None,
            next_demo: 0,
            event_tx,
            should_quit: false,
        }
    }

    pub async fn run(
        mut self,
        mut broadcast_rx: broadcast::Receiver<EngineBroadcast>,
    ) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        let (tx, mut rx) = mpsc::channel::<AppMessage>(1024);

        // ── Background task: keyboard events ──────────────────────────────────
        let key_tx = tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if key_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: engine broadcasts → AppMessage ───────────────────
        let bc_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        let app_msg = match msg {
                            EngineBroadcast::StateUpdated(state) => {
                                Some(AppMessage::StateUpdated(state))
                            }
                            EngineBroadcast::Visual(frame) => Some(AppMessage::Visual(frame)),
                            EngineBroadcast::Log(line) => Some(AppMessage::Log(line)),
                            EngineBroadcast::Error(line) => {
                                Some(AppMessage::Log(format!("error: {line}")))
                            }
                            // Badges are derived from snapshots in the list.
                            EngineBroadcast::Badge { .. } => None,
                        };
                        if let Some(app_msg) = app_msg {
                            if bc_tx.send(app_msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            let Some(msg) = rx.recv().await else { break };
            let mut redraw = self.handle_message(msg).await;
            let mut drained = 0usize;
            while drained < MAX_DRAIN {
                let Ok(next) = rx.try_recv() else { break };
                drained += 1;
                redraw |= self.handle_message(next).await;
            }
            needs_redraw = redraw;
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    async fn handle_message(&mut self, msg: AppMessage) -> bool {
        match msg {
            AppMessage::Event(ev) => match ev {
                Event::Key(key) => {
                    if key.kind == KeyEventKind::Release {
                        return false;
                    }
                    self.handle_key(key).await;
                    true
                }
                Event::Resize(_, _) => true,
                _ => false,
            },
            AppMessage::StateUpdated(state) => {
                self.on_state_updated(state);
                true
            }
            AppMessage::Visual(frame) => {
                self.frames.insert(frame.tab_id, frame);
                true
            }
            AppMessage::Log(line) => {
                self.last_log = Some(line);
                true
            }
        }
    }

    fn on_state_updated(&mut self, state: EngineState) {
        self.state = state;
        if let Some(tab_id) = self.pending_select.take() {
            if let Some(idx) = self.state.sessions.iter().position(|s| s.tab_id == tab_id) {
                self.selected = idx;
            }
        }
        self.selected = self.selected.min(self.state.sessions.len().saturating_sub(1));
        // Frames outlive their session only until the next state arrives.
        let state = &self.state;
        self.frames
            .retain(|tab_id, _| state.session(*tab_id).is_some_and(|s| s.capturing));
    }

    fn selected_snapshot(&self) -> Option<&SessionSnapshot> {
        self.state.sessions.get(self.selected)
    }

    /// Next demo stream id, advancing the cycle.
    fn cycle_demo(&mut self) -> String {
        let stream = DEMO_STREAMS[self.next_demo % DEMO_STREAMS.len()];
        self.next_demo += 1;
        stream.to_string()
    }

    async fn send(&self, command: Command) {
        if self
            .event_tx
            .send(EngineEvent::ClientCommand(command))
            .await
            .is_err()
        {
            warn!("engine event channel closed");
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.quit().await;
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit().await,
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1)
                    .min(self.state.sessions.len().saturating_sub(1));
            }
            KeyCode::Char('n') => {
                let tab_id = self
                    .state
                    .sessions
                    .iter()
                    .map(|s| s.tab_id)
                    .max()
                    .unwrap_or(0)
                    + 1;
                let stream_id = self.cycle_demo();
                self.pending_select = Some(tab_id);
                self.send(Command::Start { tab_id, stream_id }).await;
            }
            KeyCode::Char('s') => {
                if let Some(tab_id) = self.selected_snapshot().map(|s| s.tab_id) {
                    let stream_id = self.cycle_demo();
                    self.send(Command::Start { tab_id, stream_id }).await;
                }
            }
            KeyCode::Char('x') => {
                if let Some(tab_id) = self.selected_snapshot().map(|s| s.tab_id) {
                    self.send(Command::Stop { tab_id }).await;
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                if let Some(s) = self.selected_snapshot() {
                    let cap = (s.cap as u16 + CAP_STEP).min(MAX_CAP);
                    self.send(Command::SetCap { tab_id: s.tab_id, cap }).await;
                }
            }
            KeyCode::Char('-') => {
                if let Some(s) = self.selected_snapshot() {
                    let cap = (s.cap as u16).saturating_sub(CAP_STEP);
                    self.send(Command::SetCap { tab_id: s.tab_id, cap }).await;
                }
            }
            KeyCode::Char('v') => {
                if let Some(s) = self.selected_snapshot() {
                    self.send(Command::ToggleVisual {
                        tab_id: s.tab_id,
                        hidden: !s.visual_hidden,
                    })
                    .await;
                }
            }
            _ => {}
        }
    }

    /// Quit cleanly: the engine stops all sessions on Shutdown, then the
    /// run loop tears the terminal down.
    async fn quit(&mut self) {
        let _ = self.event_tx.send(EngineEvent::Shutdown).await;
        self.should_quit = true;
    }

    fn draw(&mut self, frame: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(frame.area());
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(48), Constraint::Min(10)])
            .split(rows[0]);

        session_list::draw(frame, cols[0], &self.state.sessions, self.selected);

        let snapshot = self.selected_snapshot();
        let visual = snapshot
            .and_then(|s| self.frames.get(&s.tab_id))
            .map(Arc::as_ref);
        spectrum_panel::draw(frame, cols[1], visual, snapshot);

        status_bar::draw_log_bar(frame, rows[1], self.last_log.as_deref());
        status_bar::draw_keys_bar(frame, rows[2]);
    }
}
