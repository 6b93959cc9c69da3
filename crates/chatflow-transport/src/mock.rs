//! Recording HTTP caller for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportResult;
use crate::request::{HttpCaller, HttpRequest, HttpResponse};

/// Records every request and replays queued replies in order.
///
/// When the queue is empty the fallback reply is returned (`200` with a
/// `null` body unless changed with [`MockHttpCaller::with_fallback`]).
pub struct MockHttpCaller {
    requests: Mutex<Vec<HttpRequest>>,
    replies: Mutex<VecDeque<TransportResult<HttpResponse>>>,
    fallback: TransportResult<HttpResponse>,
}

impl MockHttpCaller {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            fallback: Ok(HttpResponse::ok(Value::Null)),
        }
    }

    /// Sets the reply used once queued replies run out.
    pub fn with_fallback(mut self, reply: TransportResult<HttpResponse>) -> Self {
        self.fallback = reply;
        self
    }

    /// Queues a reply.
    pub fn reply(&self, reply: TransportResult<HttpResponse>) -> &Self {
        self.replies.lock().push_back(reply);
        self
    }

    /// Queues a `200` JSON reply.
    pub fn reply_json(&self, body: Value) -> &Self {
        self.reply(Ok(HttpResponse::ok(body)))
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests seen so far.
    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockHttpCaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpCaller for MockHttpCaller {
    async fn call(&self, req: HttpRequest) -> TransportResult<HttpResponse> {
        self.requests.lock().push(req);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
