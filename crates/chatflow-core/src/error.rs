//! Error types shared by the protocol model and the platform layer.
//!
//! Two families live here:
//!
//! - [`ProtocolError`]: construction and validation failures of canonical
//!   values (segments, messages, payloads).
//! - [`ActionError`]: the numeric-coded failure taxonomy returned by platform
//!   actions inside a failed [`Response`](crate::Response).
//!
//! [`RegistryError`] covers boot-time registration problems, which are the
//! only fatal errors of the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Protocol Errors
// =============================================================================

/// Errors raised while constructing or decoding canonical protocol values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The segment type tag is not part of the canonical vocabulary.
    #[error("bad segment type: {0}")]
    BadSegmentType(String),

    /// The segment data does not have the required shape.
    #[error("bad segment data for '{segment}': {reason}")]
    BadSegmentData {
        /// Segment type tag.
        segment: String,
        /// What was wrong with the data.
        reason: String,
    },

    /// A payload body could not be decoded for its tag.
    #[error("bad payload '{tye}': {reason}")]
    BadPayload {
        /// Payload type tag.
        tye: String,
        /// Decoder failure.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates a segment data error.
    pub fn segment_data(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadSegmentData {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Maps the protocol error onto its action error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadSegmentType(_) => ErrorCode::BadSegmentType,
            Self::BadSegmentData { .. } => ErrorCode::BadSegmentData,
            Self::BadPayload { .. } => ErrorCode::BadParam,
        }
    }
}

// =============================================================================
// Action Error Taxonomy
// =============================================================================

/// Numeric failure codes surfaced by platform actions.
///
/// Codes are grouped by class: request errors (`100xx`), identity errors
/// (`101xx`), handler errors (`200xx`), execution errors (`3xxxx`) and
/// authentication errors (`600xx`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedAction,
    BadParam,
    UnsupportedParam,
    UnsupportedSegment,
    BadSegmentType,
    BadSegmentData,
    UnsupportedHttpMethod,
    WhoAmI,
    UnknownSelf,
    BadHandler,
    InternalHandler,
    Database,
    DatabaseRead,
    DatabaseWrite,
    Filesystem,
    Network,
    Platform,
    Login,
    IAmTired,
    TokenError,
}

impl ErrorCode {
    /// Every code, in ascending numeric order.
    pub const ALL: [ErrorCode; 21] = [
        ErrorCode::BadRequest,
        ErrorCode::UnsupportedAction,
        ErrorCode::BadParam,
        ErrorCode::UnsupportedParam,
        ErrorCode::UnsupportedSegment,
        ErrorCode::BadSegmentType,
        ErrorCode::BadSegmentData,
        ErrorCode::UnsupportedHttpMethod,
        ErrorCode::WhoAmI,
        ErrorCode::UnknownSelf,
        ErrorCode::BadHandler,
        ErrorCode::InternalHandler,
        ErrorCode::Database,
        ErrorCode::DatabaseRead,
        ErrorCode::DatabaseWrite,
        ErrorCode::Filesystem,
        ErrorCode::Network,
        ErrorCode::Platform,
        ErrorCode::Login,
        ErrorCode::IAmTired,
        ErrorCode::TokenError,
    ];

    /// Returns the numeric return code.
    pub const fn retcode(self) -> i64 {
        match self {
            Self::BadRequest => 10001,
            Self::UnsupportedAction => 10002,
            Self::BadParam => 10003,
            Self::UnsupportedParam => 10004,
            Self::UnsupportedSegment => 10005,
            Self::BadSegmentType => 10006,
            Self::BadSegmentData => 10007,
            Self::UnsupportedHttpMethod => 10008,
            Self::WhoAmI => 10101,
            Self::UnknownSelf => 10102,
            Self::BadHandler => 20001,
            Self::InternalHandler => 20002,
            Self::Database => 31001,
            Self::DatabaseRead => 31002,
            Self::DatabaseWrite => 31003,
            Self::Filesystem => 32001,
            Self::Network => 33001,
            Self::Platform => 34001,
            Self::Login => 35001,
            Self::IAmTired => 36001,
            Self::TokenError => 60001,
        }
    }

    /// Returns the snake_case name of the code.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::UnsupportedAction => "unsupported_action",
            Self::BadParam => "bad_param",
            Self::UnsupportedParam => "unsupported_param",
            Self::UnsupportedSegment => "unsupported_segment",
            Self::BadSegmentType => "bad_segment_type",
            Self::BadSegmentData => "bad_segment_data",
            Self::UnsupportedHttpMethod => "unsupported_http_method",
            Self::WhoAmI => "who_am_i",
            Self::UnknownSelf => "unknown_self",
            Self::BadHandler => "bad_handler",
            Self::InternalHandler => "internal_handler",
            Self::Database => "database",
            Self::DatabaseRead => "database_read",
            Self::DatabaseWrite => "database_write",
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::Platform => "platform",
            Self::Login => "login",
            Self::IAmTired => "i_am_tired",
            Self::TokenError => "token_error",
        }
    }

    /// Looks a code up by its numeric value.
    pub fn from_retcode(retcode: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.retcode() == retcode)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A coded failure returned by a platform action.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code} ({retcode}): {message}", retcode = code.retcode())]
pub struct ActionError {
    /// Classification.
    pub code: ErrorCode,
    /// Human-readable detail, defaults to the code name.
    pub message: String,
}

impl ActionError {
    /// Creates an error carrying only the code name as its message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.name().to_string(),
        }
    }

    /// Creates an error with a custom detail message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The platform does not implement the requested capability.
    pub fn unsupported_action() -> Self {
        Self::new(ErrorCode::UnsupportedAction)
    }

    /// A required parameter is missing or has the wrong type.
    pub fn bad_param(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::BadParam, message)
    }

    /// The platform call failed.
    pub fn internal_handler(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalHandler, message)
    }

    /// The platform answered with an application-level error.
    pub fn platform(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Platform, message)
    }

    /// A network error occurred while reaching the platform.
    pub fn network(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::Network, message)
    }
}

impl From<ErrorCode> for ActionError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl From<ProtocolError> for ActionError {
    fn from(err: ProtocolError) -> Self {
        Self::with_message(err.code(), err.to_string())
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Boot-time registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A platform id was registered twice.
    #[error("platform '{0}' is already registered")]
    DuplicatePlatform(String),

    /// A platform id is not registered.
    #[error("platform '{0}' is not registered")]
    UnknownPlatform(String),

    /// Two bots share a name.
    #[error("bot '{0}' is already registered")]
    DuplicateBot(String),

    /// A globally unique rule id was declared twice.
    #[error("{kind} rule '{id}' is already registered")]
    DuplicateRule {
        /// Rule category.
        kind: String,
        /// Rule id.
        id: String,
    },

    /// A rule id is not registered.
    #[error("{kind} rule '{id}' is not registered")]
    UnknownRule {
        /// Rule category.
        kind: String,
        /// Rule id.
        id: String,
    },

    /// A rule failed validation at registration time.
    #[error("invalid rule '{id}': {reason}")]
    InvalidRule {
        /// Rule id or definition.
        id: String,
        /// Validation failure.
        reason: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for protocol construction.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type for platform actions.
pub type ActionResult<T> = Result<T, ActionError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retcodes_are_grouped() {
        assert_eq!(ErrorCode::BadRequest.retcode(), 10001);
        assert_eq!(ErrorCode::BadSegmentType.retcode(), 10006);
        assert_eq!(ErrorCode::UnknownSelf.retcode(), 10102);
        assert_eq!(ErrorCode::InternalHandler.retcode(), 20002);
        assert_eq!(ErrorCode::IAmTired.retcode(), 36001);
        assert_eq!(ErrorCode::TokenError.retcode(), 60001);
    }

    #[test]
    fn test_from_retcode() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_retcode(code.retcode()), Some(code));
        }
        assert_eq!(ErrorCode::from_retcode(42), None);
    }

    #[test]
    fn test_action_error_display() {
        let err = ActionError::internal_handler("send message error");
        assert_eq!(
            err.to_string(),
            "internal_handler (20002): send message error"
        );
        assert_eq!(ActionError::unsupported_action().message, "unsupported_action");
    }

    #[test]
    fn test_protocol_error_maps_to_code() {
        let err: ActionError = ProtocolError::BadSegmentType("sticker".into()).into();
        assert_eq!(err.code, ErrorCode::BadSegmentType);
    }
}
