//! Canonical, platform-agnostic protocol model.
//!
//! Construction of every value in this module is pure. Validation happens at
//! construction time so that malformed segments never reach dispatch.

pub mod action;
pub mod event;
pub mod message;
pub mod payload;

pub use action::{ActionName, Request, Response, Status};
pub use event::{
    CommandEventData, ConnectEventData, Event, EventData, EventType, MessageEventData, SelfInfo,
    TopicType, detail,
};
pub use message::{Message, Segment};
pub use payload::{Payload, value_text};
