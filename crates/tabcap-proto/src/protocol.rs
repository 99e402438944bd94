use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible engine.
pub const PROTOCOL_VERSION: u32 = 1;

/// Tabs are identified by the numeric id the embedding browser assigns them.
pub type TabId = u32;

/// Largest accepted volume cap.  Cap units span the analyser's decibel range
/// (130 units cover -130..0 dB), so a cap of 130 maps the limit to the top of
/// the byte-magnitude scale and effectively never attenuates.
pub const MAX_CAP: u16 = 130;

/// Messages sent from clients to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Begin capping a tab, acquiring its audio through `stream_id`.
    /// Restarts capture if the tab already has a live session.
    Start { tab_id: TabId, stream_id: String },
    Stop { tab_id: TabId },
    /// Set the volume cap for a tab.  Values above `MAX_CAP` are rejected
    /// before any session state is touched.
    SetCap { tab_id: TabId, cap: u16 },
    /// Show or hide the spectrum visuals for a tab.  Takes effect on the
    /// next control tick without restarting capture.
    ToggleVisual { tab_id: TabId, hidden: bool },
    /// The tab closed: stop its capture and drop the session together with
    /// its stored preferences.  Safe for tabs the engine never saw.
    Remove { tab_id: TabId },
    GetState,
}

/// Messages sent from the engine to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: engine version + full state snapshot.
    Hello {
        protocol_version: u32,
        engine_rev: u64,
        state: EngineState,
    },
    State {
        data: EngineState,
    },
    /// Badge text for a tab changed.  The cap as text while capping is on,
    /// empty to clear the badge.
    Badge {
        tab_id: TabId,
        text: String,
    },
    /// One control-tick spectrum frame.  Sent at the frame rate for every
    /// capturing session whose visuals are not hidden.
    Visual {
        frame: VisualFrame,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Spectrum snapshot for one tab at one control tick.
///
/// `bins` are byte magnitudes (0-255) for the leading bins the level sampler
/// reads; the three reference values are on the same 0-255 scale so a
/// renderer can draw them as horizontal lines over the bars.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VisualFrame {
    pub tab_id: TabId,
    pub bins: Vec<u8>,
    /// Mean bin magnitude as the sampler computed it this tick.
    pub average: f32,
    /// Average adjusted for the gain currently applied to the output path.
    pub corrected: f32,
    /// The active cap scaled onto the magnitude range.
    pub scaled_cap: f32,
    pub gain: f32,
}

/// Full state of the engine.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineState {
    /// Monotonic revision counter — incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub sessions: Vec<SessionSnapshot>,
}

impl EngineState {
    pub fn session(&self, tab_id: TabId) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.tab_id == tab_id)
    }
}

/// Per-tab view of one capping session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    pub tab_id: TabId,
    /// User intent: capping requested for this tab.
    pub enabled: bool,
    pub cap: u8,
    pub visual_hidden: bool,
    /// Whether a control loop is actually running.  `enabled` without
    /// `capturing` means the stream could not be acquired or has ended.
    pub capturing: bool,
    pub stream_id: Option<String>,
    /// Gain offset currently applied to the output path (0.0 = neutral).
    pub gain: f32,
}

impl SessionSnapshot {
    /// Badge text for the tab: the cap while capping is on, empty otherwise.
    pub fn badge_text(&self) -> String {
        if self.enabled {
            self.cap.to_string()
        } else {
            String::new()
        }
    }
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
