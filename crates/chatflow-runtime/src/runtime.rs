//! Runtime wiring.
//!
//! [`ChatflowRuntime`] owns the frozen platform and rule registries, the
//! store, the dispatch engine and the delivery queue.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chatflow_runtime::ChatflowRuntime;
//!
//! let runtime = ChatflowRuntime::builder()
//!     .config_file("chatflow.toml")
//!     .bot(Arc::new(MyBot::new()))
//!     .build()?;
//!
//! // feed native platform payloads from a webhook or socket
//! runtime.ingest("slack", &payload)?;
//!
//! // consumers and cron run until Ctrl+C or SIGTERM
//! runtime.run().await?;
//! ```
//!
//! # Shutdown
//!
//! Shutdown waits for in-flight events, stops the cron scheduler and the
//! queue consumers, then writes undelivered envelopes to the spool file
//! (when `queue.spool_path` is set). The next start re-queues them.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatflow_core::{BoxedAction, BoxedAdapter, Caller, Event, PlatformRegistry, SharedPlatforms};
use chatflow_framework::{
    BoxedBot, DeliveryMode, DirectOutbox, DispatchResult, Engine, MemoryStore, Outcome,
    RuleRegistry, SharedOutbox, SharedRules, SharedStore,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ChatflowConfig, ConfigLoader, validate_config};
use crate::cron::CronScheduler;
use crate::error::RuntimeResult;
use crate::logging::{self, LoggingGuard};
use crate::platforms;
use crate::queue::{DeliveryQueue, Spool, spawn_consumers};

/// A configured chatflow process.
pub struct ChatflowRuntime {
    config: ChatflowConfig,
    platforms: SharedPlatforms,
    rules: SharedRules,
    engine: Arc<Engine>,
    queue: DeliveryQueue,
    spool: Option<Spool>,
    events: TaskTracker,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
    _logging: Option<LoggingGuard>,
}

impl ChatflowRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &ChatflowConfig {
        &self.config
    }

    pub fn platforms(&self) -> &SharedPlatforms {
        &self.platforms
    }

    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Converts a native payload through the platform's adapter and
    /// dispatches it on its own task.
    ///
    /// Returns `Ok(None)` when the adapter produced nothing actionable.
    pub fn ingest(&self, platform: &str, native: &Value) -> RuntimeResult<Option<JoinHandle<()>>> {
        let event = self.platforms.require(platform)?.convert(native);
        if event.is_empty() {
            debug!(platform, "Native payload dropped by adapter");
            return Ok(None);
        }
        if self.events.is_closed() {
            warn!(platform, event_id = %event.id, "Runtime is shutting down, event dropped");
            return Ok(None);
        }

        let engine = self.engine.clone();
        let span = info_span!("ingest", platform = %platform);
        let handle = self.events.spawn(
            async move {
                match engine.handle(&event).await {
                    Ok(outcome) => debug!(?outcome, "Event handled"),
                    Err(e) => error!(error = %e, event_id = %event.id, "Event failed"),
                }
            }
            .instrument(span),
        );
        Ok(Some(handle))
    }

    /// Dispatches a canonical event on the calling task.
    pub async fn dispatch(&self, event: &Event) -> DispatchResult<Outcome> {
        self.engine.handle(event).await
    }

    /// Re-queues spooled envelopes and starts the queue consumers and the
    /// cron scheduler.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Ok(());
        }

        if let Some(spool) = &self.spool {
            let restored = self.queue.restore(spool.take().await?);
            if restored > 0 {
                info!(count = restored, path = %spool.path().display(), "Re-queued spooled deliveries");
            }
        }

        let queue_config = &self.config.queue;
        let mut workers = spawn_consumers(
            self.queue.clone(),
            self.platforms.clone(),
            queue_config.retry.clone(),
            queue_config.consumers,
            queue_config.poll_interval(),
            self.shutdown.child_token(),
        );

        if self.config.cron.enabled {
            let scheduler = CronScheduler::new(self.engine.clone(), self.queue.clone())
                .with_period(self.config.cron.tick());
            if !scheduler.is_empty() {
                workers.push(tokio::spawn(scheduler.run(self.shutdown.child_token())));
            }
        }
        self.workers.lock().extend(workers);

        info!(
            platforms = ?self.platforms.platforms(),
            bots = self.rules.len(),
            consumers = queue_config.consumers,
            delivery = ?self.config.dispatch.delivery,
            "Runtime started"
        );
        Ok(())
    }

    /// Stops the runtime and spools undelivered envelopes.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return Ok(());
        }
        info!("Stopping runtime");

        // In-flight events may still enqueue replies.
        self.events.close();
        self.events.wait().await;

        self.shutdown.cancel();
        self.queue.close();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        let pending = self.queue.drain();
        match &self.spool {
            Some(spool) => spool.save(&pending).await?,
            None if !pending.is_empty() => {
                warn!(count = pending.len(), "No spool configured, undelivered envelopes dropped");
            }
            None => {}
        }

        info!(
            queue = ?self.queue.metrics().snapshot(),
            dispatch = ?self.engine.metrics().snapshot(),
            "Runtime stopped"
        );
        Ok(())
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Chatflow runtime is now running. Press Ctrl+C to stop.");
        shutdown.await;
        self.stop().await
    }
}

impl std::fmt::Debug for ChatflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatflowRuntime")
            .field("platforms", &self.platforms.platforms())
            .field("bots", &self.rules.len())
            .field("queue", &self.queue)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`ChatflowRuntime`].
///
/// Configuration is loaded from files and `CHATFLOW_*` variables unless
/// [`RuntimeBuilder::config`] supplies it directly. Platforms listed in the
/// configuration are registered alongside those added with
/// [`RuntimeBuilder::platform`].
pub struct RuntimeBuilder {
    loader: ConfigLoader,
    config: Option<ChatflowConfig>,
    callers: Vec<Caller>,
    bots: Vec<BoxedBot>,
    store: Option<SharedStore>,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new().with_current_dir(),
            config: None,
            callers: Vec::new(),
            bots: Vec::new(),
            store: None,
            init_logging: true,
        }
    }

    /// Loads this configuration file.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    /// Sets the configuration profile, e.g. `production`.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    /// Merges configuration over the loaded files.
    pub fn merge(mut self, config: ChatflowConfig) -> Self {
        self.loader = self.loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping file and environment loading.
    pub fn config(mut self, config: ChatflowConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Registers a platform from its adapter and action.
    pub fn platform(self, adapter: BoxedAdapter, action: BoxedAction) -> Self {
        self.caller(Caller::new(adapter, action))
    }

    pub fn caller(mut self, caller: Caller) -> Self {
        self.callers.push(caller);
        self
    }

    pub fn bot(mut self, bot: BoxedBot) -> Self {
        self.bots.push(bot);
        self
    }

    /// Replaces the default in-memory store.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Leaves the global subscriber alone.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Validates the configuration and freezes both registries.
    pub fn build(self) -> RuntimeResult<ChatflowRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.loader.load()?,
        };
        let logging = self.init_logging.then(|| logging::init_logging(&config.logging));
        validate_config(&config)?;

        let mut platform_builder = PlatformRegistry::builder();
        for caller in self.callers {
            platform_builder.register(caller)?;
        }
        platforms::register_configured(&mut platform_builder, &config.platforms)?;
        let platforms: SharedPlatforms = Arc::new(platform_builder.build());

        let mut rule_builder = RuleRegistry::builder();
        for bot in self.bots {
            rule_builder.register(bot)?;
        }
        let rules: SharedRules = Arc::new(rule_builder.build()?);

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let queue =
            DeliveryQueue::with_dead_letter_capacity(config.queue.capacity, config.queue.dead_letter_capacity);
        let outbox: SharedOutbox = match config.dispatch.delivery {
            DeliveryMode::Queued => Arc::new(queue.clone()),
            DeliveryMode::Direct => Arc::new(DirectOutbox::new(platforms.clone())),
        };
        let engine = Arc::new(
            Engine::new(rules.clone(), store, outbox).with_config(config.dispatch.clone()),
        );
        let spool = config.queue.spool_path.clone().map(Spool::new);

        if platforms.is_empty() {
            warn!("No platforms registered");
        }
        info!(
            platforms = platforms.len(),
            bots = rules.len(),
            delivery = ?config.dispatch.delivery,
            "Runtime built"
        );

        Ok(ChatflowRuntime {
            config,
            platforms,
            rules,
            engine,
            queue,
            spool,
            events: TaskTracker::new(),
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            _logging: logging,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chatflow_core::{Payload, RegistryError};
    use chatflow_framework::{Bot, CommandRule, Ruleset, Step};
    use chatflow_transport::mock::MockHttpCaller;
    use serde_json::json;

    use super::*;
    use crate::config::{PlatformConfig, PlatformKind};
    use crate::error::RuntimeError;
    use crate::platforms::caller_for;

    struct PingBot {
        rules: Ruleset,
    }

    impl PingBot {
        fn boxed() -> BoxedBot {
            Arc::new(Self {
                rules: Ruleset::new().command(CommandRule::new("ping", "answers pong", |_, _| {
                    Ok(Some(Payload::text("pong")))
                })),
            })
        }
    }

    #[async_trait]
    impl Bot for PingBot {
        fn name(&self) -> &str {
            "ping"
        }

        fn rules(&self) -> &Ruleset {
            &self.rules
        }
    }

    fn slack_dm(text: &str, id: &str) -> Value {
        json!({
            "type": "events_api",
            "envelope_id": "e1",
            "payload": {
                "api_app_id": "A1",
                "authorizations": [{"user_id": "UBOT"}],
                "event": {
                    "type": "message",
                    "user": "U1",
                    "text": text,
                    "channel": "D1",
                    "channel_type": "im",
                    "ts": "1700000000.0001",
                    "client_msg_id": id
                }
            }
        })
    }

    fn runtime(config: ChatflowConfig, mock: Arc<MockHttpCaller>) -> ChatflowRuntime {
        let slack = PlatformConfig::new("slack", PlatformKind::Slack).with_token("xoxb");
        ChatflowRuntime::builder()
            .config(config)
            .without_logging()
            .caller(caller_for(&slack, mock))
            .bot(PingBot::boxed())
            .build()
            .unwrap()
    }

    /// A Slack Web API that accepts every call.
    fn slack_ok() -> Arc<MockHttpCaller> {
        Arc::new(MockHttpCaller::new().with_fallback(Ok(chatflow_transport::HttpResponse::ok(
            json!({"ok": true, "channel": "D1", "ts": "1"}),
        ))))
    }

    async fn wait_delivered(runtime: &ChatflowRuntime, count: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while runtime.queue().metrics().snapshot().delivered_total < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    fn sent_texts(mock: &MockHttpCaller) -> Vec<String> {
        mock.requests()
            .iter()
            .filter_map(|r| r.body.as_ref()?.get("text")?.as_str().map(String::from))
            .collect()
    }

    #[tokio::test]
    async fn test_ingest_direct_delivery() {
        let mock = slack_ok();
        let runtime = runtime(ChatflowConfig::default(), mock.clone());

        let handle = runtime.ingest("slack", &slack_dm("/ping", "m1")).unwrap().unwrap();
        handle.await.unwrap();
        assert_eq!(sent_texts(&mock), ["pong"]);
        assert_eq!(runtime.engine().metrics().snapshot().bot_run_command_total, 1);

        let event = runtime.platforms().require("slack").unwrap().convert(&slack_dm("/ping", "m1b"));
        let outcome = runtime.dispatch(&event).await.unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Command));
        // the redelivered first message was accepted, so it stays deduplicated
        let event = runtime.platforms().require("slack").unwrap().convert(&slack_dm("/ping", "m1"));
        assert_eq!(runtime.dispatch(&event).await.unwrap(), Outcome::Duplicate);
        assert_eq!(sent_texts(&mock), ["pong", "pong"]);
        assert_eq!(runtime.queue().metrics().snapshot().enqueued_total, 0);
    }

    #[tokio::test]
    async fn test_direct_delivery_failure_is_reported() {
        let mock = Arc::new(MockHttpCaller::new().with_fallback(Ok(
            chatflow_transport::HttpResponse::ok(json!({"ok": false, "error": "channel_not_found"})),
        )));
        let runtime = runtime(ChatflowConfig::default(), mock.clone());
        let event = runtime.platforms().require("slack").unwrap().convert(&slack_dm("/ping", "m9"));
        assert!(matches!(
            runtime.dispatch(&event).await,
            Err(chatflow_framework::DispatchError::Delivery { .. })
        ));
        assert_eq!(mock.count(), 1);
    }

    #[tokio::test]
    async fn test_ingest_unknown_platform() {
        let runtime = runtime(ChatflowConfig::default(), slack_ok());
        let err = runtime.ingest("irc", &json!({})).unwrap_err();
        assert!(matches!(err, RuntimeError::Registry(RegistryError::UnknownPlatform(_))));
        assert!(runtime.ingest("slack", &json!({"type": "noise"})).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_delivery_through_consumers() {
        let mock = slack_ok();
        let mut config = ChatflowConfig::default();
        config.dispatch.delivery = DeliveryMode::Queued;
        config.queue.consumers = 1;
        config.queue.poll_interval_ms = 5;
        let runtime = runtime(config, mock.clone());

        let outcome = runtime
            .dispatch(&runtime.platforms().require("slack").unwrap().convert(&slack_dm("/ping", "m2")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Replied(Step::Command));
        assert_eq!(runtime.queue().len(), 1);
        assert_eq!(mock.count(), 0);

        runtime.run_until(wait_delivered(&runtime, 1)).await.unwrap();
        assert_eq!(sent_texts(&mock), ["pong"]);
        let snap = runtime.queue().metrics().snapshot();
        assert_eq!((snap.enqueued_total, snap.delivered_total, snap.retried_total), (1, 1, 0));
        assert!(runtime.queue().is_empty());
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_stop_spools_and_start_restores() {
        let dir = tempfile::tempdir().unwrap();
        let spool_path = dir.path().join("spool.json");
        let mut config = ChatflowConfig::default();
        config.dispatch.delivery = DeliveryMode::Queued;
        config.queue.spool_path = Some(spool_path.clone());

        // The platform rejects every send, so the delivery stays queued.
        let failing = Arc::new(MockHttpCaller::new().with_fallback(Ok(
            chatflow_transport::HttpResponse::ok(json!({"ok": false, "error": "down"})),
        )));
        config.queue.retry.base_delay_ms = 60_000;
        config.queue.retry.max_delay_ms = 60_000;
        let first = runtime(config.clone(), failing.clone());
        first.start().await.unwrap();
        first.ingest("slack", &slack_dm("/ping", "m3")).unwrap().unwrap().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while first.queue().metrics().snapshot().retried_total == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        first.stop().await.unwrap();
        assert!(spool_path.exists());
        assert_eq!(first.queue().metrics().snapshot().delivered_total, 0);

        let mock = slack_ok();
        let second = runtime(config, mock.clone());
        second.start().await.unwrap();
        wait_delivered(&second, 1).await;
        second.stop().await.unwrap();
        assert_eq!(sent_texts(&mock), ["pong"]);
        assert_eq!(second.queue().metrics().snapshot().retried_total, 0);
        assert!(!spool_path.exists());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = ChatflowConfig::default();
        config.queue.capacity = 0;
        let result = ChatflowRuntime::builder().config(config).without_logging().build();
        assert!(matches!(result, Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_bot() {
        let result = ChatflowRuntime::builder()
            .config(ChatflowConfig::default())
            .without_logging()
            .bot(PingBot::boxed())
            .bot(PingBot::boxed())
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::Registry(RegistryError::DuplicateBot(name))) if name == "ping"
        ));
    }
}
