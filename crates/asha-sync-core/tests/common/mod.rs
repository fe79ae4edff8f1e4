//! Shared harness for engine integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use asha_sync_core::models::{Patient, PregnancyVisit, RecordPayload};
use asha_sync_core::remote::{ApiRequest, RawResponse, TransportError};
use asha_sync_core::{ConnectivityFlag, Database, Record, RemoteClient, SyncConfig, SyncEngine, Transport};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

type Reply = Result<RawResponse, TransportError>;

/// In-process backend answering from a script, in order.
#[derive(Default)]
pub struct FakeBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ApiRequest>>,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
}

impl FakeBackend {
    pub fn reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn reply_json(&self, status: u16, body: Value) {
        self.reply(Ok(RawResponse::json(status, &body)));
    }

    /// A successful create naming `id`.
    pub fn created(&self, id: i64) {
        self.reply_json(200, json!({"success": true, "message": "Created", "id": id}));
    }

    pub fn ok(&self) {
        self.reply_json(200, json!({"success": true}));
    }

    /// Park the next request until the returned handle is notified.
    pub fn hold_next(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Wait until a held request has arrived.
    pub async fn wait_held(&self) {
        self.entered.notified().await;
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Bodies of the requests sent so far, in order.
    pub fn bodies(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .map(|r| r.body.unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::NoConnection("no scripted reply".into())))
    }
}

pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub backend: Arc<FakeBackend>,
    pub network: Arc<ConnectivityFlag>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_db(Database::open_in_memory().unwrap())
    }

    pub fn open(path: &Path) -> Self {
        Self::with_db(Database::open(path).unwrap())
    }

    fn with_db(db: Database) -> Self {
        let backend = Arc::new(FakeBackend::default());
        let network = Arc::new(ConnectivityFlag::new(true));
        let remote = RemoteClient::new(backend.clone(), test_config());
        let engine = SyncEngine::new(db, remote, network.clone());
        Self {
            engine: Arc::new(engine),
            backend,
            network,
        }
    }

    pub fn offline(&self) {
        self.network.set_online(false);
    }

    pub fn online(&self) {
        self.network.set_online(true);
    }

    /// Every record's status flag agrees with the ledger.
    pub fn assert_ledger_agrees(&self) {
        assert_eq!(self.engine.ledger_disagreements().unwrap(), vec![]);
    }
}

/// No retries, so each scripted reply answers exactly one call.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        max_retries: 0,
        backoff_initial_ms: 1,
        asha_id: Some("ASHA-7".into()),
        ..SyncConfig::default()
    }
}

pub fn patient(name: &str) -> Record {
    Record::new(RecordPayload::Patient(Patient::new(name.into())))
}

pub fn pregnancy_visit(parent: &Record, risk_factors: &str) -> Record {
    Record::child_of(
        RecordPayload::PregnancyVisit(PregnancyVisit {
            visit_date: "2024-03-02".into(),
            high_risk: true,
            risk_factors: risk_factors.into(),
            ..PregnancyVisit::default()
        }),
        parent,
    )
}

pub fn patient_name(record: &Record) -> &str {
    &record.payload.as_patient().unwrap().name
}
