//! Platform registry.
//!
//! Maps a platform id to its [`Caller`], the `(adapter, action)` pair used to
//! translate inbound payloads and execute outbound requests.
//!
//! The registry is assembled once at boot with [`PlatformRegistryBuilder`]
//! and frozen into an immutable [`PlatformRegistry`]; lookups afterwards are
//! plain map reads and need no locking. Registering the same platform id
//! twice is a configuration error reported by the builder.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::action::{BoxedAction, SendMessageParams};
use super::adapter::BoxedAdapter;
use crate::error::{RegistryError, RegistryResult};
use crate::protocol::{Event, Request, Response};

// =============================================================================
// Caller
// =============================================================================

/// The adapter and action of one platform.
#[derive(Clone)]
pub struct Caller {
    pub adapter: BoxedAdapter,
    pub action: BoxedAction,
}

impl Caller {
    pub fn new(adapter: BoxedAdapter, action: BoxedAction) -> Self {
        Self { adapter, action }
    }

    /// Platform id, taken from the adapter.
    pub fn platform(&self) -> &str {
        self.adapter.platform()
    }

    /// Converts a native payload through the adapter.
    pub fn convert(&self, native: &Value) -> Event {
        self.adapter.event_convert(native)
    }

    /// Executes a request through the action.
    pub async fn call(&self, req: &Request) -> Response {
        let resp = self.action.call(req).await;
        if resp.is_ok() {
            debug!(platform = %self.platform(), action = %req.action, "Action succeeded");
        } else {
            warn!(
                platform = %self.platform(),
                action = %req.action,
                retcode = resp.retcode,
                message = %resp.message,
                "Action failed"
            );
        }
        resp
    }

    /// Sends a message.
    pub async fn send(&self, params: SendMessageParams) -> Response {
        self.call(&params.into_request()).await
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("platform", &self.platform())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Collects callers during boot.
#[derive(Default)]
pub struct PlatformRegistryBuilder {
    callers: HashMap<String, Caller>,
    order: Vec<String>,
}

impl PlatformRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a caller under its adapter's platform id.
    pub fn register(&mut self, caller: Caller) -> RegistryResult<()> {
        self.register_as(caller.platform().to_string(), caller)
    }

    /// Registers a caller under an explicit id.
    pub fn register_as(&mut self, id: impl Into<String>, caller: Caller) -> RegistryResult<()> {
        let id = id.into();
        if self.callers.contains_key(&id) {
            return Err(RegistryError::DuplicatePlatform(id));
        }
        info!(platform = %id, "Registered platform");
        self.order.push(id.clone());
        self.callers.insert(id, caller);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, caller: Caller) -> RegistryResult<Self> {
        self.register(caller)?;
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> PlatformRegistry {
        PlatformRegistry {
            callers: self.callers,
            order: self.order,
        }
    }
}

/// Immutable snapshot of platform callers.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    callers: HashMap<String, Caller>,
    order: Vec<String>,
}

impl PlatformRegistry {
    pub fn builder() -> PlatformRegistryBuilder {
        PlatformRegistryBuilder::new()
    }

    /// Looks up a caller.
    pub fn get(&self, platform: &str) -> Option<&Caller> {
        self.callers.get(platform)
    }

    /// Looks up a caller, failing for unknown ids.
    pub fn require(&self, platform: &str) -> RegistryResult<&Caller> {
        self.get(platform)
            .ok_or_else(|| RegistryError::UnknownPlatform(platform.to_string()))
    }

    /// Platform ids in registration order.
    pub fn platforms(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

/// Shared registry handle.
pub type SharedPlatforms = Arc<PlatformRegistry>;

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::platform::{Action, Adapter};
    use crate::protocol::ActionName;

    struct EchoAdapter(&'static str);

    impl Adapter for EchoAdapter {
        fn platform(&self) -> &str {
            self.0
        }

        fn event_convert(&self, _native: &Value) -> Event {
            Event::empty()
        }
    }

    struct OkAction(&'static str);

    #[async_trait]
    impl Action for OkAction {
        fn platform(&self) -> &str {
            self.0
        }

        async fn send_message(&self, _req: &Request) -> Response {
            Response::ok(json!({"message_id": "1"}))
        }
    }

    fn caller(id: &'static str) -> Caller {
        Caller::new(Arc::new(EchoAdapter(id)), Arc::new(OkAction(id)))
    }

    #[test]
    fn test_duplicate_platform_is_rejected() {
        let mut builder = PlatformRegistry::builder();
        builder.register(caller("slack")).unwrap();
        let err = builder.register(caller("slack")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicatePlatform("slack".into()));
    }

    #[test]
    fn test_lookup_and_order() {
        let registry = PlatformRegistry::builder()
            .with(caller("slack"))
            .and_then(|b| b.with(caller("discord")))
            .unwrap()
            .build();
        assert_eq!(registry.platforms(), ["slack", "discord"]);
        assert!(registry.get("discord").is_some());
        assert!(registry.require("tailchat").is_err());
    }

    #[tokio::test]
    async fn test_caller_routes_to_action() {
        let c = caller("slack");
        let resp = c.call(&Request::new(ActionName::SendMessage)).await;
        assert!(resp.is_ok());
        let resp = c.call(&Request::new(ActionName::CreateChannel)).await;
        assert!(!resp.is_ok());
    }
}
