//! Scriptable in-memory remote service for unit tests

use crate::remote::RemoteService;
use async_trait::async_trait;
use livelink_shared::ConnectionError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub struct MockSession {
    pub id: u64,
}

#[derive(Default)]
struct MockState {
    opens: AtomicU64,
    probes: AtomicU64,
    closes: AtomicU64,
    open_script: Mutex<VecDeque<Result<(), ConnectionError>>>,
    probe_script: Mutex<VecDeque<Result<(), ConnectionError>>>,
    open_fallback: Mutex<Option<ConnectionError>>,
    open_delay: Mutex<Duration>,
    probe_delay: Mutex<Duration>,
}

/// Remote service whose outcomes are queued by the test.
///
/// Clones share state, so a test can keep one while the manager owns another.
#[derive(Clone, Default)]
pub struct MockService {
    state: Arc<MockState>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next `open()` calls; afterwards opens succeed
    pub fn script_opens(&self, results: impl IntoIterator<Item = Result<(), ConnectionError>>) {
        self.state.open_script.lock().unwrap().extend(results);
    }

    /// Every open after the script runs out fails with `error`
    pub fn fail_opens_with(&self, error: ConnectionError) {
        *self.state.open_fallback.lock().unwrap() = Some(error);
    }

    pub fn script_probes(&self, results: impl IntoIterator<Item = Result<(), ConnectionError>>) {
        self.state.probe_script.lock().unwrap().extend(results);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock().unwrap() = delay;
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        *self.state.probe_delay.lock().unwrap() = delay;
    }

    pub fn opens(&self) -> u64 {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u64 {
        self.state.probes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteService for MockService {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, ConnectionError> {
        let id = self.state.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.state.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.open_script.lock().unwrap().pop_front();
        let fallback = self.state.open_fallback.lock().unwrap().clone();
        match scripted.or_else(|| fallback.map(Err)) {
            Some(Err(e)) => Err(e),
            Some(Ok(())) | None => Ok(MockSession { id }),
        }
    }

    async fn probe(&self, _session: &MockSession) -> Result<(), ConnectionError> {
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.state.probe_script.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(()))
    }

    async fn close(&self, _session: Arc<MockSession>) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
