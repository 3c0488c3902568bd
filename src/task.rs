use crate::error::Result;
use crate::types::{DecisionStatus, TimeStamp, UserId};
use crate::utils::{TASK_HRP, new_id};
use chrono::Utc;

/// One approver's decision scope for a step.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AgreementTask {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub step_id: String,
    #[n(2)]
    pub step_index: u32, // copied from the owning step at creation
    #[n(3)]
    pub approver: UserId,
    #[n(4)]
    pub status: DecisionStatus,
    #[n(5)]
    pub comments: Option<String>,
    #[n(6)]
    pub decided_at: Option<TimeStamp<Utc>>,
}

impl AgreementTask {
    pub fn new(step_id: String, step_index: u32, approver: UserId) -> Result<Self> {
        Ok(Self {
            id: new_id(TASK_HRP)?,
            step_id,
            step_index,
            approver,
            status: DecisionStatus::Waiting,
            comments: None,
            decided_at: None,
        })
    }
    pub fn is_waiting(&self) -> bool {
        self.status == DecisionStatus::Waiting
    }
    /// Whether this task belongs to `actor` at the given step.
    pub fn is_live_for(&self, current_step: u32, actor: &str) -> bool {
        self.step_index == current_step && self.approver == actor
    }
    pub(crate) fn set_status(&mut self, status: DecisionStatus) {
        self.status = status;
        self.decided_at = Some(TimeStamp::new());
    }
}
