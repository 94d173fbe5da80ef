//! Connection Lifecycle
//!
//! The four transport states the quote client moves through, plus the
//! close information reported when a transport goes away.
//!
//! ```text
//! Disconnected ──symbol──► Connecting ──open──► Open
//!      ▲                       │                 │
//!      │                       └──── close ◄─────┤
//!      │                                         │ teardown
//!      └─────────────── Closing ◄────────────────┘
//! ```

use std::fmt;

// =============================================================================
// Close Codes
// =============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint going away (page navigation, server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// =============================================================================
// Connection State
// =============================================================================

/// Transport lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No transport exists.
    #[default]
    Disconnected,
    /// A transport has been requested but has not opened yet.
    Connecting,
    /// The transport is open and messages flow in both directions.
    Open,
    /// A close has been requested and is in flight.
    Closing,
}

impl ConnectionState {
    /// Check if the transport is open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if a transport exists or is being established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Closing)
    }

    /// Stable lowercase name, used for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        }
    }

    /// Numeric value exported on the connection state gauge.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Close Information
// =============================================================================

/// How a close should be treated for reporting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// 1000 or 1001. Nothing worth telling the user about.
    Clean,
    /// Any other code.
    Abnormal,
}

impl CloseKind {
    /// Classify a close code.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            CLOSE_NORMAL | CLOSE_GOING_AWAY => Self::Clean,
            _ => Self::Abnormal,
        }
    }
}

/// Close code and reason reported for a transport that went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text, possibly empty.
    pub reason: String,
}

impl CloseInfo {
    /// Create close information from a code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal (1000) close with the given reason.
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    /// A transport that vanished without a close frame.
    #[must_use]
    pub const fn abnormal() -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
        }
    }

    /// A close frame that carried no status code.
    #[must_use]
    pub const fn no_status() -> Self {
        Self {
            code: CLOSE_NO_STATUS,
            reason: String::new(),
        }
    }

    /// Classify this close.
    #[must_use]
    pub const fn kind(&self) -> CloseKind {
        CloseKind::from_code(self.code)
    }

    /// Human-readable message for the error output, if the close deserves one.
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        match (self.kind(), self.code) {
            (CloseKind::Clean, _) => None,
            (CloseKind::Abnormal, CLOSE_ABNORMAL) => {
                Some("connection to the quote server closed abnormally".to_string())
            }
            (CloseKind::Abnormal, code) => Some(format!("connection closed (code {code})")),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1000, CloseKind::Clean ; "normal closure")]
    #[test_case(1001, CloseKind::Clean ; "going away")]
    #[test_case(1005, CloseKind::Abnormal ; "no status")]
    #[test_case(1006, CloseKind::Abnormal ; "abnormal drop")]
    #[test_case(1011, CloseKind::Abnormal ; "server error")]
    #[test_case(4001, CloseKind::Abnormal ; "application code")]
    fn close_code_classification(code: u16, expected: CloseKind) {
        assert_eq!(CloseKind::from_code(code), expected);
    }

    #[test]
    fn clean_close_has_no_user_message() {
        assert!(CloseInfo::normal("bye").user_message().is_none());
        assert!(CloseInfo::new(CLOSE_GOING_AWAY, "").user_message().is_none());
    }

    #[test]
    fn abnormal_drop_has_dedicated_message() {
        let message = CloseInfo::abnormal().user_message().unwrap();
        assert!(message.contains("abnormally"));
    }

    #[test]
    fn other_codes_mention_the_code() {
        let message = CloseInfo::new(4001, "kicked").user_message().unwrap();
        assert_eq!(message, "connection closed (code 4001)");
    }

    #[test]
    fn state_names_and_activity() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
        assert!(ConnectionState::Open.is_open());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
    }

    #[test]
    fn close_info_display() {
        assert_eq!(CloseInfo::abnormal().to_string(), "1006");
        assert_eq!(CloseInfo::normal("done").to_string(), "1000 (done)");
    }
}
