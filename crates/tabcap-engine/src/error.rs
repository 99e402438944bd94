use tabcap_proto::protocol::MAX_CAP;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Stream acquisition failed or the stream ended externally.  The
    /// session falls back to `enabled = false` when this surfaces.
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    /// Lifecycle misuse: the graph was driven after `close`.  Unreachable
    /// when the control loop owns the graph; asserted in debug builds.
    #[error("audio graph already closed")]
    GraphClosed,

    /// Cap outside the accepted range.  Rejected at the command boundary,
    /// never reaches the gain controller.
    #[error("invalid cap {0} (max {})", MAX_CAP)]
    InvalidCap(u16),
}
