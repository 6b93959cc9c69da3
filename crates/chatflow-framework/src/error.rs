//! Error types for the chatflow framework.

use chatflow_core::RegistryError;
use thiserror::Error;

/// Errors raised while parsing a rule grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// The definition has no tokens.
    #[error("empty grammar definition")]
    Empty,

    /// A `[...]` placeholder is not one of the known kinds.
    #[error("unknown placeholder '[{0}]'")]
    UnknownPlaceholder(String),

    /// `[any]` swallows the rest of the input and must come last.
    #[error("'[any]' must be the last token of '{0}'")]
    AnyNotLast(String),
}

/// Errors returned by bot handlers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BotError {
    /// The handler failed.
    #[error("handler failed: {0}")]
    Handler(String),

    /// An argument could not be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is not implemented by the bot.
    #[error("not supported: {0}")]
    Unsupported(String),
}

impl BotError {
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record that must exist is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// A pipeline continuation carried an outdated version.
    #[error("stale pipeline '{flag}': expected version {expected}, got {found}")]
    VersionConflict {
        flag: String,
        expected: u32,
        found: u32,
    },

    /// A session is already running for the key.
    #[error("session already started for {uid}@{topic}")]
    SessionAlreadyStarted { uid: String, topic: String },

    /// Backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the dispatch engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The platform rejected an outbound message.
    #[error("delivery to {platform} failed ({retcode}): {message}")]
    Delivery {
        platform: String,
        retcode: i64,
        message: String,
    },

    /// The outbound message could not be queued.
    #[error("queue error: {0}")]
    Queue(String),
}

/// Result type for grammar parsing.
pub type GrammarResult<T> = Result<T, GrammarError>;

/// Result type for bot handlers.
pub type BotResult<T> = Result<T, BotError>;

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
