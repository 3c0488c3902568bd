//! Related-record handlers, resolved by model name
use crate::error::{AgreementError, Result};
use crate::types::RecordRef;
use std::collections::HashMap;
use std::sync::Arc;

/// Callbacks a business model exposes to the workflow.
pub trait RecordHandler: Send + Sync {
    fn approve(&self, record: &RecordRef) -> anyhow::Result<()>;
    fn decline(&self, record: &RecordRef) -> anyhow::Result<()>;
    /// Sub-line records found under `attribute` on `record`.
    fn lines(&self, _record: &RecordRef, _attribute: &str) -> anyhow::Result<Vec<RecordRef>> {
        Ok(vec![])
    }
    /// Back reference from a line to the process approving it.
    fn bind_process(&self, _line: &RecordRef, _process_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Side effect on a related record, collected while a process transitions and
/// dispatched once the transition has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEffect {
    Approve(RecordRef),
    Decline(RecordRef),
    BindProcess { line: RecordRef, process_id: String },
}

#[derive(Default, Clone)]
pub struct RecordRegistry {
    handlers: HashMap<String, Arc<dyn RecordHandler>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(mut self, model: impl Into<String>, handler: Arc<dyn RecordHandler>) -> Self {
        self.handlers.insert(model.into(), handler);
        self
    }
    pub fn resolve(&self, record: &RecordRef) -> Result<&dyn RecordHandler> {
        self.handlers
            .get(&record.model)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| AgreementError::UnknownModel {
                record: record.clone(),
            })
    }
    pub fn lines(&self, record: &RecordRef, attribute: &str) -> Result<Vec<RecordRef>> {
        self.resolve(record)?
            .lines(record, attribute)
            .map_err(AgreementError::Callback)
    }
    pub fn dispatch(&self, effects: &[RecordEffect]) -> Result<()> {
        for effect in effects {
            log::debug!("dispatching {effect:?}");
            let outcome = match effect {
                RecordEffect::Approve(record) => self.resolve(record)?.approve(record),
                RecordEffect::Decline(record) => self.resolve(record)?.decline(record),
                RecordEffect::BindProcess { line, process_id } => {
                    self.resolve(line)?.bind_process(line, process_id)
                }
            };
            outcome.map_err(AgreementError::Callback)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordRegistry")
            .field("models", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
