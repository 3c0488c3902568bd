use crate::error::Result;
use crate::task::AgreementTask;
use crate::types::{TimeStamp, UserId};
use crate::utils::{STEP_HRP, new_id};
use chrono::Utc;

/// A materialized position of the route within one process run.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AgreementStep {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub step_index: u32,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
}

impl AgreementStep {
    /// Creates the step together with one waiting task per distinct approver.
    /// This is the only place tasks for a step are spawned.
    pub fn materialize(step_index: u32, approvers: &[UserId]) -> Result<(Self, Vec<AgreementTask>)> {
        let step = Self {
            id: new_id(STEP_HRP)?,
            step_index,
            created_at: TimeStamp::new(),
        };
        let mut tasks: Vec<AgreementTask> = Vec::with_capacity(approvers.len());
        for approver in approvers {
            if tasks.iter().any(|task| &task.approver == approver) {
                continue;
            }
            tasks.push(AgreementTask::new(step.id.clone(), step_index, approver.clone())?);
        }

        Ok((step, tasks))
    }
}
