//! Shared fixtures: a payment request model and a handler that records every
//! callback the workflow makes.
#![allow(dead_code)]

use agreement_workflow::facade::Agreeable;
use agreement_workflow::registry::{RecordHandler, RecordRegistry};
use agreement_workflow::service::AgreementService;
use agreement_workflow::types::RecordRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const REQUEST_MODEL: &str = "payment.request";
pub const LINE_MODEL: &str = "payment.request.line";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Declined,
}

/// Records approve/decline callbacks and serves sub-lines per request.
#[derive(Default)]
pub struct Ledger {
    pub outcomes: Mutex<HashMap<RecordRef, Outcome>>,
    pub lines: Mutex<HashMap<String, Vec<RecordRef>>>,
    pub bound: Mutex<Vec<(RecordRef, String)>>,
    pub calls: Mutex<Vec<(RecordRef, Outcome)>>,
    pub refuse_decline: Mutex<bool>,
    pub refuse_decline_of: Mutex<Option<RecordRef>>,
}

impl Ledger {
    pub fn outcome(&self, record: &RecordRef) -> Option<Outcome> {
        self.outcomes.lock().unwrap().get(record).copied()
    }
    /// How many times the workflow called back `record` with `outcome`.
    pub fn calls(&self, record: &RecordRef, outcome: Outcome) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, seen)| called == record && *seen == outcome)
            .count()
    }
    fn record(&self, record: &RecordRef, outcome: Outcome) {
        self.outcomes.lock().unwrap().insert(record.clone(), outcome);
        self.calls.lock().unwrap().push((record.clone(), outcome));
    }
}

impl RecordHandler for Ledger {
    fn approve(&self, record: &RecordRef) -> anyhow::Result<()> {
        self.record(record, Outcome::Approved);
        Ok(())
    }
    fn decline(&self, record: &RecordRef) -> anyhow::Result<()> {
        let refused = self.refuse_decline_of.lock().unwrap().as_ref() == Some(record);
        if refused || *self.refuse_decline.lock().unwrap() {
            anyhow::bail!("record {record} is locked");
        }
        self.record(record, Outcome::Declined);
        Ok(())
    }
    fn lines(&self, record: &RecordRef, attribute: &str) -> anyhow::Result<Vec<RecordRef>> {
        assert_eq!(attribute, "lines");
        Ok(self
            .lines
            .lock()
            .unwrap()
            .get(&record.id)
            .cloned()
            .unwrap_or_default())
    }
    fn bind_process(&self, line: &RecordRef, process_id: &str) -> anyhow::Result<()> {
        self.bound
            .lock()
            .unwrap()
            .push((line.clone(), process_id.to_string()));
        Ok(())
    }
}

pub struct PaymentRequest {
    pub id: String,
    pub with_lines: bool,
}

impl PaymentRequest {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            with_lines: false,
        }
    }
    /// A request whose sub-lines are approved individually.
    pub fn with_lines(id: &str, ledger: &Ledger, line_ids: &[&str]) -> Self {
        let lines = line_ids
            .iter()
            .map(|line| RecordRef::new(LINE_MODEL, *line))
            .collect();
        ledger.lines.lock().unwrap().insert(id.to_string(), lines);
        Self {
            id: id.to_string(),
            with_lines: true,
        }
    }
    pub fn line(&self, line_id: &str) -> RecordRef {
        RecordRef::new(LINE_MODEL, line_id)
    }
}

impl Agreeable for PaymentRequest {
    fn record_ref(&self) -> RecordRef {
        RecordRef::new(REQUEST_MODEL, self.id.clone())
    }
    fn lines_attribute(&self) -> Option<&str> {
        self.with_lines.then_some("lines")
    }
}

pub struct Harness {
    // keeps the database directory alive for the duration of the test
    _dir: TempDir,
    pub db: Arc<sled::Db>,
    pub registry: RecordRegistry,
    pub service: AgreementService,
    pub ledger: Arc<Ledger>,
}

impl Harness {
    /// Another service over the same database, with its own write lock.
    pub fn second_service(&self) -> AgreementService {
        AgreementService::new(self.db.clone(), self.registry.clone())
    }
}

// Sled uses file-based locking, so every test gets its own database in a
// temporary directory.
pub fn harness() -> anyhow::Result<Harness> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("agreements.db"))?);
    let ledger = Arc::new(Ledger::default());
    let registry = RecordRegistry::new()
        .register(REQUEST_MODEL, ledger.clone())
        .register(LINE_MODEL, ledger.clone());

    Ok(Harness {
        _dir: dir,
        service: AgreementService::new(db.clone(), registry.clone()),
        db,
        registry,
        ledger,
    })
}
