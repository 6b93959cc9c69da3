//! Cron scheduler.
//!
//! Every [`CronRule`] registered by a bot becomes a job. On each tick the
//! scheduler runs the jobs that came due and queues their payloads for the
//! recorded contacts.
//!
//! | Scope | Action runs | Audience |
//! |-------|-------------|----------|
//! | `user` | once per contact, as that contact | the contact |
//! | `system` | once, detached | every contact |
//!
//! A payload is sent to a contact at most once per rule: identical content
//! (by SHA-256 of its JSON form) is skipped on later firings.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chatflow_core::{Payload, SelfInfo};
use chatflow_framework::{Contact, CronFn, CronScope, Ctx, Engine};
use chrono::{DateTime, Utc};
use cron::Schedule;
use sha2::{Digest, Sha256};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::DeliveryQueue;

struct CronJob {
    name: String,
    bot: String,
    scope: CronScope,
    schedule: Schedule,
    action: CronFn,
    next: Option<DateTime<Utc>>,
}

/// Runs scheduled rules and queues what they produce.
pub struct CronScheduler {
    engine: Arc<Engine>,
    queue: DeliveryQueue,
    jobs: Vec<CronJob>,
    period: Duration,
}

impl CronScheduler {
    /// Collects the cron rules of every bot. Rules whose expression does
    /// not parse are skipped.
    pub fn new(engine: Arc<Engine>, queue: DeliveryQueue) -> Self {
        let jobs = engine
            .rules()
            .crons()
            .filter_map(|(bot, rule)| match Schedule::from_str(&rule.when) {
                Ok(schedule) => Some(CronJob {
                    name: rule.name.clone(),
                    bot: bot.name().to_string(),
                    scope: rule.scope,
                    schedule,
                    action: rule.action.clone(),
                    next: None,
                }),
                Err(e) => {
                    error!(rule = %rule.name, when = %rule.when, error = %e, "Invalid cron expression, rule skipped");
                    None
                }
            })
            .collect();
        Self {
            engine,
            queue,
            jobs,
            period: Duration::from_secs(1),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Number of schedulable jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs every job due at `now` and returns how many envelopes were
    /// queued.
    ///
    /// A job's first tick only computes its next firing time.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let mut due = Vec::new();
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            match job.next {
                Some(next) if next <= now => {
                    due.push(idx);
                    job.next = job.schedule.after(&now).next();
                }
                Some(_) => {}
                None => job.next = job.schedule.after(&now).next(),
            }
        }
        if due.is_empty() {
            return 0;
        }

        let contacts = match self.engine.store().contacts().await {
            Ok(contacts) => contacts,
            Err(e) => {
                error!(error = %e, "Failed to load contacts");
                return 0;
            }
        };

        let mut queued = 0;
        for idx in due {
            let job = &self.jobs[idx];
            debug!(rule = %job.name, contacts = contacts.len(), "Cron rule due");
            queued += self.fire(job, &contacts, now).await;
        }
        queued
    }

    async fn fire(&self, job: &CronJob, contacts: &[Contact], now: DateTime<Utc>) -> usize {
        let rules = self.engine.rules().clone();
        let contact_ctx = |c: &Contact| {
            Ctx::detached(SelfInfo::new(&c.platform, ""), &c.uid, &c.topic, rules.clone())
                .for_bot(&job.bot)
                .with_now(now)
        };

        let mut queued = 0;
        match job.scope {
            CronScope::User => {
                for contact in contacts {
                    let ctx = contact_ctx(contact);
                    for payload in (job.action)(&ctx) {
                        queued += self.push(job, &ctx, payload).await;
                    }
                }
            }
            CronScope::System => {
                let detached = Ctx::detached(SelfInfo::default(), "", "", rules.clone())
                    .for_bot(&job.bot)
                    .with_now(now);
                let payloads = (job.action)(&detached);
                for contact in contacts {
                    let ctx = contact_ctx(contact);
                    for payload in &payloads {
                        queued += self.push(job, &ctx, payload.clone()).await;
                    }
                }
            }
        }
        if queued > 0 {
            info!(rule = %job.name, queued, "Cron rule fired");
        }
        queued
    }

    async fn push(&self, job: &CronJob, ctx: &Ctx, payload: Payload) -> usize {
        let hash = match serde_json::to_vec(&payload) {
            Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
            Err(e) => {
                warn!(rule = %job.name, error = %e, "Unserializable cron payload");
                return 0;
            }
        };
        let scope = format!("cron:{}:{}", job.name, ctx.uid());
        match self.engine.store().first_seen(&scope, &hash).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(rule = %job.name, uid = %ctx.uid(), "Duplicate cron payload skipped");
                return 0;
            }
            Err(e) => {
                error!(rule = %job.name, error = %e, "Cron de-duplication failed");
                return 0;
            }
        }

        let envelope = match self.engine.record(ctx, payload, BTreeMap::new()).await {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(rule = %job.name, error = %e, "Failed to record cron payload");
                return 0;
            }
        };
        match self.queue.enqueue(&envelope).await {
            Ok(_) => 1,
            Err(e) => {
                warn!(rule = %job.name, error = %e, "Cron payload not queued");
                0
            }
        }
    }

    /// Ticks until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        if self.jobs.is_empty() {
            debug!("No cron rules, scheduler idle");
            return;
        }
        info!(jobs = self.jobs.len(), period = ?self.period, "Cron scheduler started");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }
        info!("Cron scheduler stopped");
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("jobs", &self.jobs.iter().map(|j| j.name.as_str()).collect::<Vec<_>>())
            .field("period", &self.period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chatflow_framework::{
        Bot, CronRule, DirectOutbox, MemoryStore, RuleRegistry, Ruleset, Store,
    };
    use chrono::TimeZone;

    use super::*;

    struct Reminder {
        rules: Ruleset,
    }

    #[async_trait]
    impl Bot for Reminder {
        fn name(&self) -> &str {
            "reminder"
        }

        fn rules(&self) -> &Ruleset {
            &self.rules
        }
    }

    fn scheduler(rules: Ruleset) -> (CronScheduler, Arc<MemoryStore>, DeliveryQueue) {
        let registry = Arc::new(
            RuleRegistry::builder()
                .with(Arc::new(Reminder { rules }))
                .unwrap()
                .build()
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::new());
        let platforms = Arc::new(chatflow_core::PlatformRegistry::builder().build());
        let engine = Arc::new(Engine::new(
            registry,
            store.clone(),
            Arc::new(DirectOutbox::new(platforms)),
        ));
        let queue = DeliveryQueue::new(16);
        (CronScheduler::new(engine, queue.clone()), store, queue)
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, secs).unwrap()
    }

    async fn contacts(store: &MemoryStore) {
        store.record_contact(Contact::new("slack", "u1", "D1")).await.unwrap();
        store.record_contact(Contact::new("discord", "u2", "D2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_expression_is_skipped() {
        let (scheduler, _, _) = scheduler(
            Ruleset::new()
                .cron(CronRule::new("bad", "not a schedule", |_| vec![]))
                .cron(CronRule::new("ok", "*/5 * * * * *", |_| vec![])),
        );
        assert_eq!(scheduler.len(), 1);
    }

    #[tokio::test]
    async fn test_user_scope_runs_per_contact() {
        let (mut scheduler, store, queue) = scheduler(Ruleset::new().cron(CronRule::new(
            "greet",
            "* * * * * *",
            |ctx: &Ctx| vec![Payload::text(format!("hi {}", ctx.uid()))],
        )));
        contacts(&store).await;

        assert_eq!(scheduler.tick(at(0)).await, 0, "first tick arms the job");
        assert_eq!(scheduler.tick(at(1)).await, 2);

        let first = queue.try_reserve().unwrap().envelope().unwrap();
        // Contacts come back ordered by platform.
        assert_eq!(first.rcpt_to, "D2");
        assert_eq!(first.platform(), "discord");
        assert_eq!(first.payload, Payload::text("hi u2"));
        assert!(first.seq > 0);
    }

    #[tokio::test]
    async fn test_identical_payload_is_sent_once() {
        let (mut scheduler, store, queue) = scheduler(Ruleset::new().cron(
            CronRule::new("news", "* * * * * *", |_| vec![Payload::text("same")])
                .scope(CronScope::System),
        ));
        contacts(&store).await;

        scheduler.tick(at(0)).await;
        assert_eq!(scheduler.tick(at(1)).await, 2);
        assert_eq!(scheduler.tick(at(2)).await, 0);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_job_waits_for_schedule() {
        let (mut scheduler, store, _) = scheduler(Ruleset::new().cron(CronRule::new(
            "minutely",
            "0 * * * * *",
            |ctx: &Ctx| vec![Payload::text(ctx.now().to_rfc3339())],
        )));
        contacts(&store).await;

        scheduler.tick(at(0)).await;
        assert_eq!(scheduler.tick(at(30)).await, 0);
        let next_minute = at(0) + chrono::Duration::minutes(1);
        assert_eq!(scheduler.tick(next_minute).await, 2);
    }
}
