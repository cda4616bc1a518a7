//! In-memory backend for local development and tests.
//!
//! Clones share one object map, so a test can keep a clone to inspect call
//! counters or inject faults after handing the backend to a store.

use crate::cadapter::client::{BackendError, ObjectBackend};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct State {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    delay: Mutex<Option<Duration>>,
    slow_put_reply: Mutex<Option<(Vec<u8>, Duration)>>,
}

#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<State>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.state.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.state.put_calls.load(Ordering::SeqCst)
    }

    /// Make every following `put_object` fail until reset.
    pub fn fail_puts(&self, fail: bool) {
        self.state.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.state.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long before answering any call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Store puts of exactly `content` at once but hold their reply back
    /// for `delay`.
    pub fn slow_put_reply(&self, content: &[u8], delay: Duration) {
        *self.state.slow_put_reply.lock().unwrap() = Some((content.to_vec(), delay));
    }

    /// Direct read, bypassing counters and faults.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.state.objects.lock().unwrap().get(key).cloned()
    }

    async fn pause(&self) {
        let delay = *self.state.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ObjectBackend for InMemoryBackend {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        self.pause().await;
        self.state.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_puts.load(Ordering::SeqCst) {
            return Err(format!("injected put failure for {key}").into());
        }
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        let reply_delay = match &*self.state.slow_put_reply.lock().unwrap() {
            Some((content, d)) if content.as_slice() == data => Some(*d),
            _ => None,
        };
        if let Some(d) = reply_delay {
            tokio::time::sleep(d).await;
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.pause().await;
        self.state.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_gets.load(Ordering::SeqCst) {
            return Err(format!("injected get failure for {key}").into());
        }
        Ok(self.state.objects.lock().unwrap().get(key).cloned())
    }

    async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        self.pause().await;
        self.state.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.pause().await;
        self.state.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.state.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
