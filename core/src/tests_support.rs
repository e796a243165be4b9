//! Fakes shared by unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::collector::ValuePool;
use crate::core::finding::Finding;
use crate::errors::{FuzzError, Result};
use crate::http::{HttpRequest, Outcome, Transport};
use crate::oracle::{MutationOracle, MutationSet};
use crate::FuzzEventSink;

#[derive(Default)]
pub struct RecordingSink {
    logs: Mutex<Vec<(String, String)>>,
    findings: Mutex<Vec<Finding>>,
}

impl RecordingSink {
    pub fn new_ref() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn logs(&self) -> Vec<(String, String)> {
        self.logs.lock().unwrap().clone()
    }

    pub fn findings(&self) -> usize {
        self.findings.lock().unwrap().len()
    }
}

impl FuzzEventSink for RecordingSink {
    fn on_log(&self, level: &str, message: &str) {
        self.logs.lock().unwrap().push((level.to_string(), message.to_string()));
    }

    fn on_finding(&self, finding: &Finding) {
        self.findings.lock().unwrap().push(finding.clone());
    }

    fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
}

/// Transport answering from a closure and keeping every request it saw.
pub struct FnTransport<F> {
    respond: F,
    sent: Mutex<Vec<HttpRequest>>,
}

impl<F> FnTransport<F>
where
    F: Fn(&HttpRequest) -> Outcome + Send + Sync,
{
    pub fn new(respond: F) -> Arc<Self> {
        Arc::new(Self {
            respond,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> Transport for FnTransport<F>
where
    F: Fn(&HttpRequest) -> Outcome + Send + Sync,
{
    async fn send(&self, request: &HttpRequest) -> Outcome {
        self.sent.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

/// Returns the same payload for every key and round.
pub struct FixedOracle(pub Vec<u8>);

#[async_trait]
impl MutationOracle for FixedOracle {
    async fn mutate(&self, pool: &ValuePool, count: usize) -> Result<MutationSet> {
        let mut set = MutationSet::new(count);
        for key in pool.keys() {
            set.insert(key.clone(), vec![self.0.clone(); count])?;
        }
        Ok(set)
    }
}

pub struct FailingOracle;

#[async_trait]
impl MutationOracle for FailingOracle {
    async fn mutate(&self, _pool: &ValuePool, _count: usize) -> Result<MutationSet> {
        Err(FuzzError::MutationOracle {
            path: "/usr/bin/radamsa".to_string(),
            reason: "exited with 1".to_string(),
        })
    }
}
