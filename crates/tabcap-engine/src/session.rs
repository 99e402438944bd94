//! Per-tab session state and the store that keys it.
//!
//! A [`Session`] carries the tab's preferences, the lock-free knobs its
//! control loop reads every tick, and (while capturing) the loop itself.
//! The store owns all sessions; mutations for one tab go through the engine
//! core's event queue, so there is never more than one live graph per tab.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;

use tabcap_proto::prefs::TabPrefs;
use tabcap_proto::protocol::{SessionSnapshot, TabId};

use crate::control_loop::ControlLoop;
use crate::controller::RESTING_GAIN;

/// Knobs shared between the engine core and one control loop.  The loop
/// reads `cap` and `visual_hidden` each tick and publishes the gain it just
/// applied; the core writes the knobs and reads the gain for snapshots.
/// Plain relaxed atomics: every value is a self-contained scalar and a tick
/// late is fine.
pub struct SharedControls {
    cap: AtomicU8,
    visual_hidden: AtomicBool,
    gain_bits: AtomicU32,
}

impl SharedControls {
    pub fn new(cap: u8, visual_hidden: bool) -> Self {
        Self {
            cap: AtomicU8::new(cap),
            visual_hidden: AtomicBool::new(visual_hidden),
            gain_bits: AtomicU32::new(RESTING_GAIN.to_bits()),
        }
    }

    pub fn cap(&self) -> u8 {
        self.cap.load(Ordering::Relaxed)
    }

    pub fn set_cap(&self, cap: u8) {
        self.cap.store(cap, Ordering::Relaxed);
    }

    pub fn visual_hidden(&self) -> bool {
        self.visual_hidden.load(Ordering::Relaxed)
    }

    pub fn set_visual_hidden(&self, hidden: bool) {
        self.visual_hidden.store(hidden, Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn store_gain(&self, gain: f32) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }
}

/// A running capture: the stream id it was opened from and the loop driving
/// its graph.
pub struct Capture {
    pub stream_id: String,
    control_loop: ControlLoop,
}

pub struct Session {
    pub tab_id: TabId,
    pub prefs: TabPrefs,
    controls: Arc<SharedControls>,
    capture: Option<Capture>,
}

impl Session {
    pub fn new(tab_id: TabId, prefs: TabPrefs) -> Self {
        let controls = Arc::new(SharedControls::new(prefs.cap, prefs.visual_hidden));
        Self {
            tab_id,
            prefs,
            controls,
            capture: None,
        }
    }

    pub fn controls(&self) -> Arc<SharedControls> {
        Arc::clone(&self.controls)
    }

    pub fn is_capturing(&self) -> bool {
        self.capture
            .as_ref()
            .map(|c| c.control_loop.is_running())
            .unwrap_or(false)
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.capture.as_ref().map(|c| c.stream_id.as_str())
    }

    /// Hand a freshly started loop to the session.  The previous capture
    /// must already be stopped; starting over a live one would leave two
    /// graphs on the same tab.
    pub fn attach_capture(&mut self, stream_id: String, control_loop: ControlLoop) {
        debug_assert!(self.capture.is_none(), "capture attached over a live one");
        self.capture = Some(Capture {
            stream_id,
            control_loop,
        });
    }

    /// Stop and discard the capture, if any.  Waits for the loop to wind
    /// down, so no tick for this tab runs after this returns.
    pub async fn stop_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.control_loop.stop().await;
        }
    }

    pub fn set_cap(&mut self, cap: u8) {
        self.prefs.cap = cap;
        self.controls.set_cap(cap);
    }

    pub fn set_visual_hidden(&mut self, hidden: bool) {
        self.prefs.visual_hidden = hidden;
        self.controls.set_visual_hidden(hidden);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tab_id: self.tab_id,
            enabled: self.prefs.enabled,
            cap: self.prefs.cap,
            visual_hidden: self.prefs.visual_hidden,
            capturing: self.is_capturing(),
            stream_id: self.capture.as_ref().map(|c| c.stream_id.clone()),
            gain: self.controls.gain(),
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: HashMap<TabId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&Session> {
        self.sessions.get(&tab_id)
    }

    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut Session> {
        self.sessions.get_mut(&tab_id)
    }

    /// Fetch the tab's session, creating it from the given preferences if
    /// this is the first command to mention the tab.
    pub fn entry(&mut self, tab_id: TabId, prefs: TabPrefs) -> &mut Session {
        self.sessions
            .entry(tab_id)
            .or_insert_with(|| Session::new(tab_id, prefs))
    }

    /// Drop the tab's session, stopping its capture first.  Unknown tabs
    /// are a no-op.
    pub async fn remove(&mut self, tab_id: TabId) -> bool {
        match self.sessions.remove(&tab_id) {
            Some(mut session) => {
                session.stop_capture().await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every live capture.  Used on engine shutdown.
    pub async fn stop_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.stop_capture().await;
        }
    }

    /// Snapshots for every known tab, ordered by tab id so state payloads
    /// are stable across publishes.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self.sessions.values().map(Session::snapshot).collect();
        all.sort_by_key(|s| s.tab_id);
        all
    }
}
