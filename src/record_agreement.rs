use crate::error::Result;
use crate::types::{DecisionStatus, RecordRef, TimeStamp};
use crate::utils::{LINE_HRP, new_id};
use chrono::Utc;

/// One sub-line (or whole-record) decision within a task.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct RecordAgreement {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub task_id: String,
    #[n(2)]
    pub related_record: RecordRef,
    #[n(3)]
    pub status: DecisionStatus,
    #[n(4)]
    pub comments: Option<String>,
    #[n(5)]
    pub decided_at: Option<TimeStamp<Utc>>,
}

impl RecordAgreement {
    pub fn new(task_id: String, related_record: RecordRef) -> Result<Self> {
        Ok(Self {
            id: new_id(LINE_HRP)?,
            task_id,
            related_record,
            status: DecisionStatus::Waiting,
            comments: None,
            decided_at: None,
        })
    }
    pub fn approve(&mut self) {
        self.set_status(DecisionStatus::Approved);
    }
    pub fn decline(&mut self) {
        self.set_status(DecisionStatus::Declined);
    }
    pub fn set_status(&mut self, status: DecisionStatus) {
        self.status = status;
        self.decided_at = match status {
            DecisionStatus::Waiting => None,
            _ => Some(TimeStamp::new()),
        };
    }
}
