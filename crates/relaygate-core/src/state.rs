use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one tenant session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Init,
    AwaitingScan,
    Ready,
    Disconnected,
    /// Terminal. No adapter exists after this.
    Closed,
}

impl SessionState {
    /// Status label used on the real-time channel and the HTTP API.
    pub fn as_status_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitingScan => "qr",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Closed => "closed",
        }
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::AwaitingScan => "AWAITING_SCAN",
            Self::Ready => "READY",
            Self::Disconnected => "DISCONNECTED",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
