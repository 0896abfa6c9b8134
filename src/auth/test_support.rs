//! Test doubles for the token service and the clock

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AuthorizationData, Clock, TokenFetcher};

pub fn encode_token(plain: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(plain)
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += TimeDelta::from_std(by).unwrap();
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Default)]
struct Script {
    responses: Mutex<VecDeque<Result<Vec<AuthorizationData>, String>>>,
    calls: AtomicUsize,
}

/// Token fetcher replaying queued responses and counting calls
///
/// Clones share the same script and counter.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Script>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_data(&self, data: Vec<AuthorizationData>) {
        self.script.responses.lock().push_back(Ok(data));
    }

    pub fn push_token(&self, token: &str, expires_at: DateTime<Utc>) {
        self.push_data(vec![AuthorizationData {
            token: Some(token.to_string()),
            expires_at: Some(expires_at),
        }]);
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .responses
            .lock()
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenFetcher for ScriptedFetcher {
    async fn fetch_token(&self) -> Result<Vec<AuthorizationData>> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.responses.lock().pop_front();
        match next {
            Some(Ok(data)) => Ok(data),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted response left")),
        }
    }
}
