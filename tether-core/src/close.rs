//! Transport close-code classification
//!
//! WebSocket close codes are folded into a small fixed vocabulary that drives
//! the client's reaction to a lost connection:
//!
//! | Code(s)                         | Class              | Reaction            |
//! |---------------------------------|--------------------|---------------------|
//! | 1000                            | `close_normal`     | go offline          |
//! | 1001, 1005, 1006, 1012, 1013    | `retry_later`      | reconnect (backoff) |
//! | 1002, 1003, 1007, 1010          | `protocol_error`   | terminal error      |
//! | 1008, 1009                      | `policy_violation` | terminal error      |
//! | 1011 and anything unknown       | `internal_error`   | terminal error      |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normal closure (RFC 6455 section 7.4.1)
pub const CLOSE_NORMAL: u16 = 1000;

/// Going away; used by servers that restart.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Abnormal closure: the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Classification of a transport close code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseClass {
    /// Orderly shutdown requested by either side
    CloseNormal,
    /// Transient condition; the client should reconnect after a backoff
    RetryLater,
    /// The peer saw malformed or unsupported data
    ProtocolError,
    /// The peer rejected the session on policy grounds
    PolicyViolation,
    /// Server fault or an unrecognized code
    InternalError,
}

impl CloseClass {
    /// Classify a raw close code
    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => CloseClass::CloseNormal,
            1001 | 1005 | 1006 | 1012 | 1013 => CloseClass::RetryLater,
            1002 | 1003 | 1007 | 1010 => CloseClass::ProtocolError,
            1008 | 1009 => CloseClass::PolicyViolation,
            _ => CloseClass::InternalError,
        }
    }

    /// Stable string form, used as the error code surfaced to callers
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseClass::CloseNormal => "close_normal",
            CloseClass::RetryLater => "retry_later",
            CloseClass::ProtocolError => "protocol_error",
            CloseClass::PolicyViolation => "policy_violation",
            CloseClass::InternalError => "internal_error",
        }
    }

    /// Whether a close with this class should be followed by a reconnect
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CloseClass::RetryLater)
    }
}

impl fmt::Display for CloseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_table() {
        let table = [
            (1000, CloseClass::CloseNormal),
            (1001, CloseClass::RetryLater),
            (1002, CloseClass::ProtocolError),
            (1003, CloseClass::ProtocolError),
            (1005, CloseClass::RetryLater),
            (1006, CloseClass::RetryLater),
            (1007, CloseClass::ProtocolError),
            (1008, CloseClass::PolicyViolation),
            (1009, CloseClass::PolicyViolation),
            (1010, CloseClass::ProtocolError),
            (1011, CloseClass::InternalError),
            (1012, CloseClass::RetryLater),
            (1013, CloseClass::RetryLater),
        ];

        for (code, class) in table {
            assert_eq!(CloseClass::from_code(code), class, "code {}", code);
        }
    }

    #[test]
    fn test_unknown_codes_are_internal_errors() {
        assert_eq!(CloseClass::from_code(4000), CloseClass::InternalError);
        assert_eq!(CloseClass::from_code(0), CloseClass::InternalError);
        assert_eq!(CloseClass::from_code(1004), CloseClass::InternalError);
    }

    #[test]
    fn test_only_retry_later_is_recoverable() {
        assert!(CloseClass::RetryLater.is_recoverable());
        assert!(!CloseClass::CloseNormal.is_recoverable());
        assert!(!CloseClass::ProtocolError.is_recoverable());
        assert!(!CloseClass::PolicyViolation.is_recoverable());
        assert!(!CloseClass::InternalError.is_recoverable());
    }

    #[test]
    fn test_display_matches_wire_names() {
        assert_eq!(CloseClass::PolicyViolation.to_string(), "policy_violation");
        assert_eq!(
            serde_json::to_string(&CloseClass::RetryLater).unwrap(),
            "\"retry_later\""
        );
    }
}
