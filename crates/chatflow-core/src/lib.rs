//! # Chatflow Core
//!
//! The canonical protocol and platform contracts of the chatflow engine.
//!
//! ## Layers
//!
//! ### Protocol
//!
//! Platform-agnostic vocabulary:
//! - **Events**: normalized notifications ([`Event`], [`MessageEventData`])
//! - **Messages**: ordered typed segments ([`Message`], [`Segment`])
//! - **Payloads**: typed bot responses ([`Payload`])
//! - **Actions**: outbound requests and coded responses ([`Request`], [`Response`])
//!
//! ### Platform
//!
//! Per-platform translation:
//! - **Adapter**: native payload to [`Event`] ([`Adapter`])
//! - **Action**: canonical request to native API call ([`Action`])
//! - **Registry**: platform id to `(adapter, action)` ([`PlatformRegistry`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌────────────┐   event_convert   ┌──────────┐   payload   ┌────────────┐
//! │  Platform  │──────────────────▶│ Dispatch │────────────▶│   Action   │
//! │ transport  │                   │  engine  │             │ send_message│
//! └────────────┘                   └──────────┘             └────────────┘
//! ```

pub mod error;
pub mod platform;
pub mod protocol;

pub use error::{
    ActionError, ActionResult, ErrorCode, ProtocolError, ProtocolResult, RegistryError,
    RegistryResult,
};
pub use platform::{
    Action, Adapter, BoxedAction, BoxedAdapter, Caller, ChoiceOption, PlatformRegistry,
    PlatformRegistryBuilder, SendMessageParams, SharedPlatforms,
};
pub use protocol::{
    ActionName, CommandEventData, ConnectEventData, Event, EventData, EventType, Message,
    MessageEventData, Payload, Request, Response, Segment, SelfInfo, Status, TopicType, detail,
};
