use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;
use uwan_engine::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(HttpResponse),
    Fail(String),
}

#[derive(Default)]
struct Inner {
    queued: RefCell<HashMap<HttpMethod, VecDeque<Scripted>>>,
    defaults: RefCell<HashMap<HttpMethod, Scripted>>,
    requests: RefCell<Vec<HttpRequest>>,
    delay: Cell<Duration>,
}

/// Transport that answers from per-method scripts and records every request.
///
/// Queued responses are used first, in order; after that the method's default
/// repeats. A method with neither fails with a transport error. Clones share
/// the same script.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Rc<Inner>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: HttpMethod, status: u16, body: Value) {
        self.push(method, Scripted::Respond(HttpResponse::json(status, &body)));
    }

    pub fn respond_raw(&self, method: HttpMethod, status: u16, body: &str) {
        self.push(method, Scripted::Respond(HttpResponse::new(status, body)));
    }

    pub fn fail(&self, method: HttpMethod, message: &str) {
        self.push(method, Scripted::Fail(message.to_string()));
    }

    pub fn set_default(&self, method: HttpMethod, status: u16, body: Value) {
        self.inner
            .defaults
            .borrow_mut()
            .insert(method, Scripted::Respond(HttpResponse::json(status, &body)));
    }

    pub fn set_default_failure(&self, method: HttpMethod, message: &str) {
        self.inner
            .defaults
            .borrow_mut()
            .insert(method, Scripted::Fail(message.to_string()));
    }

    /// Every response waits this long (virtual time under a paused runtime).
    pub fn set_delay(&self, delay: Duration) {
        self.inner.delay.set(delay);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.requests.borrow().clone()
    }

    pub fn requests_for(&self, method: HttpMethod) -> Vec<HttpRequest> {
        self.inner
            .requests
            .borrow()
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.inner.requests.borrow().len()
    }

    pub fn count_for(&self, method: HttpMethod) -> usize {
        self.inner.requests.borrow().iter().filter(|r| r.method == method).count()
    }

    fn push(&self, method: HttpMethod, scripted: Scripted) {
        self.inner
            .queued
            .borrow_mut()
            .entry(method)
            .or_default()
            .push_back(scripted);
    }

    fn next_for(&self, request: &HttpRequest) -> Scripted {
        let queued = self
            .inner
            .queued
            .borrow_mut()
            .get_mut(&request.method)
            .and_then(VecDeque::pop_front);
        queued
            .or_else(|| self.inner.defaults.borrow().get(&request.method).cloned())
            .unwrap_or_else(|| {
                Scripted::Fail(format!("no scripted response for {} {}", request.method.as_str(), request.url))
            })
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let scripted = self.next_for(&request);
        self.inner.requests.borrow_mut().push(request);

        let delay = self.inner.delay.get();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match scripted {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(message) => Err(TransportError(message)),
        }
    }
}
