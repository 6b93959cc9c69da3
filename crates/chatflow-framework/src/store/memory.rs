use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ActionState, Contact, PipelineRecord, SessionRecord, Store, StoredMessage};
use crate::error::{StoreError, StoreResult};

/// Default number of keys remembered per `first_seen` scope.
pub const DEFAULT_SEEN_CAPACITY: usize = 65_536;

#[derive(Default)]
struct Inner {
    sessions: HashMap<(String, String), SessionRecord>,
    pipelines: HashMap<(String, String, String), PipelineRecord>,
    messages: HashMap<(String, i64), StoredMessage>,
    /// `(uid, seq)` to the topic of the latest message saved under it.
    by_uid: HashMap<(String, i64), String>,
    seqs: HashMap<String, i64>,
    actions: HashMap<(String, i64), ActionState>,
    contacts: BTreeSet<Contact>,
    seen: HashMap<String, SeenWindow>,
}

/// Insertion-ordered key set that forgets its oldest key when full.
#[derive(Default)]
struct SeenWindow {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenWindow {
    fn insert(&mut self, key: &str, capacity: usize) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        while self.order.len() >= capacity.max(1) {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.keys.remove(&oldest);
                }
                None => break,
            }
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    fn remove(&mut self, key: &str) {
        if self.keys.remove(key) {
            self.order.retain(|k| k != key);
        }
    }
}

/// In-process [`Store`].
///
/// Everything lives in one map set behind a single lock; state is lost when
/// the process exits. `first_seen` remembers at most `seen_capacity` keys
/// per scope and evicts the oldest first.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    seen_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }

    pub fn with_seen_capacity(mut self, capacity: usize) -> Self {
        self.seen_capacity = capacity.max(1);
        self
    }
}

fn key2(a: &str, b: &str) -> (String, String) {
    (a.to_string(), b.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_session(&self, uid: &str, topic: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.inner.read().sessions.get(&key2(uid, topic)).cloned())
    }

    async fn set_session(&self, record: SessionRecord) -> StoreResult<()> {
        let key = key2(&record.uid, &record.topic);
        self.inner.write().sessions.insert(key, record);
        Ok(())
    }

    async fn clear_session(&self, uid: &str, topic: &str) -> StoreResult<()> {
        self.inner.write().sessions.remove(&key2(uid, topic));
        Ok(())
    }

    async fn get_pipeline(&self, uid: &str, topic: &str, flag: &str) -> StoreResult<Option<PipelineRecord>> {
        let key = (uid.to_string(), topic.to_string(), flag.to_string());
        Ok(self.inner.read().pipelines.get(&key).cloned())
    }

    async fn set_pipeline(&self, record: PipelineRecord, expected: Option<u32>) -> StoreResult<()> {
        let key = (record.uid.clone(), record.topic.clone(), record.flag.clone());
        let mut inner = self.inner.write();
        let found = inner.pipelines.get(&key).map(|p| p.version);
        match (expected, found) {
            (None, None) => {}
            (Some(e), Some(f)) if e == f => {}
            (e, f) => {
                return Err(StoreError::VersionConflict {
                    flag: record.flag,
                    expected: e.unwrap_or(0),
                    found: f.unwrap_or(0),
                });
            }
        }
        inner.pipelines.insert(key, record);
        Ok(())
    }

    async fn clear_pipeline(&self, uid: &str, topic: &str, flag: &str) -> StoreResult<()> {
        let key = (uid.to_string(), topic.to_string(), flag.to_string());
        self.inner.write().pipelines.remove(&key);
        Ok(())
    }

    async fn save_message(&self, mut message: StoredMessage) -> StoreResult<i64> {
        let mut inner = self.inner.write();
        let seq = inner.seqs.entry(message.topic.clone()).or_insert(0);
        *seq += 1;
        let seq = *seq;
        message.seq = seq;
        inner
            .by_uid
            .insert((message.uid.clone(), seq), message.topic.clone());
        inner.messages.insert((message.topic.clone(), seq), message);
        Ok(seq)
    }

    async fn get_message(&self, topic: &str, seq: i64) -> StoreResult<Option<StoredMessage>> {
        Ok(self.inner.read().messages.get(&(topic.to_string(), seq)).cloned())
    }

    async fn get_message_by_uid(&self, uid: &str, seq: i64) -> StoreResult<Option<StoredMessage>> {
        let inner = self.inner.read();
        let message = inner
            .by_uid
            .get(&(uid.to_string(), seq))
            .and_then(|topic| inner.messages.get(&(topic.clone(), seq)))
            .cloned();
        Ok(message)
    }

    async fn get_action_state(&self, topic: &str, seq: i64) -> StoreResult<Option<ActionState>> {
        Ok(self.inner.read().actions.get(&(topic.to_string(), seq)).copied())
    }

    async fn set_action_state(&self, topic: &str, seq: i64, state: ActionState) -> StoreResult<()> {
        self.inner.write().actions.insert((topic.to_string(), seq), state);
        Ok(())
    }

    async fn record_contact(&self, contact: Contact) -> StoreResult<()> {
        self.inner.write().contacts.insert(contact);
        Ok(())
    }

    async fn contacts(&self) -> StoreResult<Vec<Contact>> {
        Ok(self.inner.read().contacts.iter().cloned().collect())
    }

    async fn first_seen(&self, scope: &str, key: &str) -> StoreResult<bool> {
        let capacity = self.seen_capacity;
        let mut inner = self.inner.write();
        Ok(inner.seen.entry(scope.to_string()).or_default().insert(key, capacity))
    }

    async fn forget(&self, scope: &str, key: &str) -> StoreResult<()> {
        if let Some(window) = self.inner.write().seen.get_mut(scope) {
            window.remove(key);
        }
        Ok(())
    }
}
