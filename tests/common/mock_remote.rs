//! Scripted remote API
//!
//! Records every call in order, and answers from per-record failure scripts
//! and a queue of canned fetch responses.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use eventsync::client::remote::{FetchPage, FetchQuery, RemoteApi, RemoteError};
use eventsync::shared::{Collection, Mutation, OperationKind};

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Fetch {
        collection: Collection,
        query: FetchQuery,
    },
    Apply {
        operation: OperationKind,
        collection: Collection,
        id: String,
    },
}

/// A canned fetch response, delivered after `delay`
pub struct ScriptedFetch {
    pub delay: Duration,
    pub result: Result<FetchPage, RemoteError>,
}

#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    /// Every write to these ids fails with the given error
    always_fail: Mutex<HashMap<String, RemoteError>>,
    /// The next writes to these ids fail, one error per call
    fail_next: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    fetches: Mutex<VecDeque<ScriptedFetch>>,
    write_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_always(&self, id: &str, error: RemoteError) {
        self.always_fail.lock().unwrap().insert(id.to_string(), error);
    }

    pub fn fail_next(&self, id: &str, error: RemoteError) {
        self.fail_next
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn push_fetch(&self, delay: Duration, result: Result<FetchPage, RemoteError>) {
        self.fetches.lock().unwrap().push_back(ScriptedFetch { delay, result });
    }

    pub fn push_page(&self, records: Vec<Value>, total_count: Option<u64>) {
        self.push_fetch(Duration::ZERO, Ok(FetchPage { records, total_count }));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Record ids of every write, in call order
    pub fn applied_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Apply { id, .. } => Some(id),
                RemoteCall::Fetch { .. } => None,
            })
            .collect()
    }

    pub fn apply_count(&self) -> usize {
        self.applied_ids().len()
    }

    pub fn fetch_queries(&self) -> Vec<FetchQuery> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Fetch { query, .. } => Some(query),
                RemoteCall::Apply { .. } => None,
            })
            .collect()
    }

    /// Highest number of writes that were ever in flight at once
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn fetch(&self, collection: Collection, query: &FetchQuery) -> Result<FetchPage, RemoteError> {
        self.calls.lock().unwrap().push(RemoteCall::Fetch {
            collection,
            query: query.clone(),
        });

        let scripted = self.fetches.lock().unwrap().pop_front();
        match scripted {
            Some(ScriptedFetch { delay, result }) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => Ok(FetchPage::default()),
        }
    }

    async fn apply(&self, mutation: &Mutation) -> Result<Option<Value>, RemoteError> {
        let id = mutation.record_id().to_string();
        self.calls.lock().unwrap().push(RemoteCall::Apply {
            operation: mutation.operation(),
            collection: mutation.collection(),
            id: id.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.write_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.always_fail.lock().unwrap().get(&id) {
            return Err(error.clone());
        }
        if let Some(error) = self
            .fail_next
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(None)
    }
}
