//! # Chatflow Transport
//!
//! The HTTP seam between platform actions and the network.
//!
//! Platform actions describe native API calls as [`HttpRequest`] values and
//! hand them to an [`HttpCaller`]. Production code uses the reqwest-backed
//! [`ReqwestCaller`]; tests substitute [`mock::MockHttpCaller`], which
//! records requests and replays canned responses.
//!
//! ## Features
//!
//! - `http-client` (default): [`ReqwestCaller`]
//! - `mock`: [`mock::MockHttpCaller`]
//!
//! ```rust,ignore
//! use chatflow_transport::{HttpCaller, HttpRequest, ReqwestCaller};
//!
//! let caller = ReqwestCaller::new(Duration::from_secs(30))?;
//! let resp = caller
//!     .call(HttpRequest::post("https://slack.com/api/chat.postMessage").bearer("xoxb-..").json(body))
//!     .await?;
//! ```

mod error;
mod request;

#[cfg(feature = "http-client")]
mod client;

#[cfg(feature = "mock")]
pub mod mock;

pub use error::{TransportError, TransportResult};
pub use request::{HttpCaller, HttpMethod, HttpRequest, HttpResponse, SharedHttpCaller};

#[cfg(feature = "http-client")]
pub use client::ReqwestCaller;
