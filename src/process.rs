//! The approval state machine
//!
//! An [`AgreementProcess`] is one run of the workflow over an agreement. It
//! owns its route snapshot and every step, task and record agreement created
//! while it runs, and it is persisted as a single document.
//!
//! Transitions never call related records directly. They push
//! [`RecordEffect`]s into the [`Transition`] they are given, and the caller
//! dispatches those once the whole operation has succeeded.
use crate::agreement::Agreement;
use crate::error::{AgreementError, Result, ValidationError};
use crate::record_agreement::RecordAgreement;
use crate::registry::{RecordEffect, RecordRegistry};
use crate::route::{RouteLine, RouteOwner, RouteRef};
use crate::step::AgreementStep;
use crate::task::AgreementTask;
use crate::types::{DecisionStatus, RecordRef, TimeStamp, UserId};
use crate::utils::{PROCESS_HRP, new_id};
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub enum ProcessStatus {
    #[default]
    #[n(0)]
    Draft,
    #[n(1)]
    InProgress,
    #[n(2)]
    Approved,
    #[n(3)]
    Declined,
    #[n(4)]
    Canceled,
}

impl ProcessStatus {
    /// Draft and in-progress processes block a new run on the same agreement.
    pub fn is_active(self) -> bool {
        matches!(self, ProcessStatus::Draft | ProcessStatus::InProgress)
    }
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Everything a transition needs from outside the process, plus the side
/// effects it produced.
pub struct Transition<'a> {
    pub agreement: &'a Agreement,
    pub registry: &'a RecordRegistry,
    effects: Vec<RecordEffect>,
}

impl<'a> Transition<'a> {
    pub fn new(agreement: &'a Agreement, registry: &'a RecordRegistry) -> Self {
        Self {
            agreement,
            registry,
            effects: vec![],
        }
    }
    pub fn effects(&self) -> &[RecordEffect] {
        &self.effects
    }
    pub fn into_effects(self) -> Vec<RecordEffect> {
        self.effects
    }
    fn push(&mut self, effect: RecordEffect) {
        self.effects.push(effect);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct AgreementProcess {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub agreement_id: String,
    #[n(2)]
    pub status: ProcessStatus,
    #[n(3)]
    pub current_step: u32,
    #[n(4)]
    pub route: Vec<RouteLine>,
    #[n(5)]
    pub steps: Vec<AgreementStep>,
    #[n(6)]
    pub tasks: Vec<AgreementTask>,
    #[n(7)]
    pub record_agreements: Vec<RecordAgreement>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl AgreementProcess {
    pub fn new(agreement_id: String) -> Result<Self> {
        Ok(Self {
            id: new_id(PROCESS_HRP)?,
            agreement_id,
            status: ProcessStatus::Draft,
            current_step: 0,
            route: vec![],
            steps: vec![],
            tasks: vec![],
            record_agreements: vec![],
            created_at: TimeStamp::new(),
        })
    }

    pub fn has_route(&self) -> bool {
        !self.route.is_empty()
    }

    // ROUTE

    /// Copies `previous`'s route into this process with fresh identities.
    pub fn copy_route_from(&mut self, previous: &AgreementProcess) -> Result<()> {
        self.route = previous
            .route
            .iter()
            .map(|line| line.copy_for(RouteOwner::Process(self.id.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Replaces the route of a draft process with a copy of a shared route.
    pub fn assign_route(&mut self, route: &RouteRef) -> Result<()> {
        self.ensure_draft()?;
        self.route = route.copy_into_process(&self.id)?;
        Ok(())
    }

    pub fn add_route_line(&mut self, step_index: u32, approvers: Vec<UserId>) -> Result<&RouteLine> {
        self.ensure_draft()?;
        let line = RouteLine::new(RouteOwner::Process(self.id.clone()), step_index, approvers)?;
        self.route.push(line);
        Ok(&self.route[self.route.len() - 1])
    }

    pub fn route_line(&self, step_index: u32) -> Option<&RouteLine> {
        self.route.iter().find(|line| line.step_index == step_index)
    }

    fn ensure_draft(&self) -> Result<()> {
        if self.status != ProcessStatus::Draft {
            return Err(AgreementError::InvalidState(format!(
                "route can only be changed while the process is in draft, current status: {:?}",
                self.status
            )));
        }
        Ok(())
    }

    // QUERIES

    pub fn task(&self, task_id: &str) -> Option<&AgreementTask> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn step_tasks<'s>(&'s self, step_id: &'s str) -> impl Iterator<Item = &'s AgreementTask> {
        self.tasks.iter().filter(move |task| task.step_id == step_id)
    }

    pub fn latest_step(&self) -> Option<&AgreementStep> {
        self.steps.iter().max_by_key(|step| step.step_index)
    }

    /// Step index of the task owning `record_agreement`.
    pub fn record_agreement_step(&self, record_agreement: &RecordAgreement) -> Option<u32> {
        self.task(&record_agreement.task_id).map(|task| task.step_index)
    }

    /// The actor's undecided task at the current step.
    pub fn waiting_task_for(&self, actor: &str) -> Option<&AgreementTask> {
        self.tasks
            .iter()
            .find(|task| task.is_live_for(self.current_step, actor) && task.is_waiting())
    }

    /// Record agreements assigned to the actor at the current step.
    pub fn pending_record_agreements(&self, actor: &str) -> Vec<&RecordAgreement> {
        self.record_agreements
            .iter()
            .filter(|ra| {
                self.task(&ra.task_id)
                    .is_some_and(|task| task.is_live_for(self.current_step, actor))
            })
            .collect()
    }

    fn current_record_agreements(&self) -> Vec<&RecordAgreement> {
        self.record_agreements
            .iter()
            .filter(|ra| self.record_agreement_step(ra) == Some(self.current_step))
            .collect()
    }

    // PROCESS TRANSITIONS

    /// Moves a draft process onto its first step. A process without any route
    /// stays in draft.
    pub fn start(&mut self, cx: &mut Transition) -> Result<()> {
        if !self.has_route() {
            log::debug!("process {} has no route, staying in draft", self.id);
            return Ok(());
        }
        self.create_next_step(cx)?;
        if self.status == ProcessStatus::Draft {
            self.status = ProcessStatus::InProgress;
        }
        log::info!("process {} started at step {}", self.id, self.current_step);
        Ok(())
    }

    pub fn create_next_step(&mut self, cx: &mut Transition) -> Result<()> {
        if !self.status.is_active() {
            return Ok(());
        }

        let next_index = self.current_step + 1;
        self.decline_lines(cx);

        let Some(route_line) = self.route_line(next_index).cloned() else {
            if next_index > 1 {
                self.finish(cx);
                return Ok(());
            }
            return Err(ValidationError::MissingFirstStep.into());
        };

        let lines = self.approval_lines(cx)?;
        let (step, tasks) = AgreementStep::materialize(next_index, &route_line.approvers)?;
        for task in &tasks {
            for line in &lines {
                self.record_agreements
                    .push(RecordAgreement::new(task.id.clone(), line.clone())?);
            }
        }
        let agreement = cx.agreement;
        for line in lines.iter().filter(|line| **line != agreement.related_record) {
            cx.push(RecordEffect::BindProcess {
                line: line.clone(),
                process_id: self.id.clone(),
            });
        }

        log::debug!(
            "process {} materialized step {} with {} task(s)",
            self.id,
            next_index,
            tasks.len()
        );
        self.steps.push(step);
        self.tasks.extend(tasks);
        self.current_step = next_index;
        Ok(())
    }

    /// Lines each task of a new step decides on: the record's sub-lines, or the
    /// record itself when it has none.
    fn approval_lines(&self, cx: &Transition) -> Result<Vec<RecordRef>> {
        let related = &cx.agreement.related_record;
        let lines = match &cx.agreement.lines_attribute {
            Some(attribute) => cx.registry.lines(related, attribute)?,
            None => vec![],
        };
        if lines.is_empty() {
            return Ok(vec![related.clone()]);
        }
        Ok(lines)
    }

    /// Notifies related records whose lines were declined at the current step.
    fn decline_lines(&self, cx: &mut Transition) {
        for ra in self.current_record_agreements() {
            if ra.status == DecisionStatus::Declined {
                cx.push(RecordEffect::Decline(ra.related_record.clone()));
            }
        }
    }

    /// Completes the route. Each related record is approved only when all of
    /// its record agreements at the current step are approved; the process is
    /// approved either way.
    pub fn finish(&mut self, cx: &mut Transition) {
        let mut tally: Vec<(&RecordRef, usize, usize)> = vec![];
        for ra in self.current_record_agreements() {
            let approved = usize::from(ra.status == DecisionStatus::Approved);
            match tally.iter_mut().find(|(record, _, _)| **record == ra.related_record) {
                Some(entry) => {
                    entry.1 += approved;
                    entry.2 += 1;
                }
                None => tally.push((&ra.related_record, approved, 1)),
            }
        }
        for (record, approved, total) in tally {
            if approved > 0 && approved == total {
                cx.push(RecordEffect::Approve(record.clone()));
            }
        }

        self.status = ProcessStatus::Approved;
        log::info!("process {} approved", self.id);
    }

    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            log::debug!("process {} already {:?}, cancel ignored", self.id, self.status);
            return;
        }
        self.status = ProcessStatus::Canceled;
        log::info!("process {} canceled", self.id);
    }

    /// Declines every related record touched by this run, then the run itself.
    pub fn decline(&mut self, cx: &mut Transition) {
        let mut declined: Vec<&RecordRef> = vec![];
        for ra in &self.record_agreements {
            if !declined.contains(&&ra.related_record) {
                declined.push(&ra.related_record);
            }
        }
        for record in declined {
            cx.push(RecordEffect::Decline(record.clone()));
        }

        self.status = ProcessStatus::Declined;
        log::info!("process {} declined at step {}", self.id, self.current_step);
    }

    // STEP

    /// Advances the process once every task of the step is approved.
    pub fn try_move_to_next_step(&mut self, step_id: &str, cx: &mut Transition) -> Result<()> {
        let all_approved = self
            .step_tasks(step_id)
            .all(|task| task.status == DecisionStatus::Approved);
        if all_approved {
            self.create_next_step(cx)?;
        }
        Ok(())
    }

    // TASK

    fn task_mut(&mut self, task_id: &str) -> Result<&mut AgreementTask> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| AgreementError::NotFound {
                kind: "task",
                id: task_id.to_string(),
            })
    }

    /// Approves a task once the actor has decided every line of it. A task
    /// whose lines were all declined declines the whole process instead.
    pub fn save_task(&mut self, task_id: &str, actor: &str, cx: &mut Transition) -> Result<()> {
        let task = self.task(task_id).ok_or_else(|| AgreementError::NotFound {
            kind: "task",
            id: task_id.to_string(),
        })?;
        let step_id = task.step_id.clone();
        let decisions: Vec<DecisionStatus> = if task.is_live_for(self.current_step, actor) {
            self.record_agreements
                .iter()
                .filter(|ra| ra.task_id == task_id)
                .map(|ra| ra.status)
                .collect()
        } else {
            vec![]
        };

        if decisions.contains(&DecisionStatus::Waiting) {
            return Err(ValidationError::UndecidedLines.into());
        }

        self.task_mut(task_id)?.set_status(DecisionStatus::Approved);

        if !decisions.is_empty() && decisions.iter().all(|d| *d == DecisionStatus::Declined) {
            return self.decline_task(task_id, cx);
        }
        self.try_move_to_next_step(&step_id, cx)
    }

    /// Record-level approval: the whole-record line is decided as approved,
    /// then the task is saved. Sub-lines still need explicit decisions.
    pub fn approve_task(&mut self, task_id: &str, actor: &str, cx: &mut Transition) -> Result<()> {
        let whole_record = &cx.agreement.related_record;
        for ra in self.record_agreements.iter_mut() {
            if ra.task_id == task_id
                && ra.related_record == *whole_record
                && ra.status == DecisionStatus::Waiting
            {
                ra.approve();
            }
        }
        self.save_task(task_id, actor, cx)
    }

    /// A single declined task fails the whole run.
    pub fn decline_task(&mut self, task_id: &str, cx: &mut Transition) -> Result<()> {
        let task = self.task_mut(task_id)?;
        task.set_status(DecisionStatus::Declined);
        log::info!("task {} declined by {}", task.id, task.approver);
        self.decline(cx);
        Ok(())
    }

    pub fn set_approve_by_lines(&mut self, task_id: &str, actor: &str, lines: &[RecordRef]) {
        self.set_lines_status(task_id, actor, lines, DecisionStatus::Approved);
    }

    pub fn set_decline_by_lines(&mut self, task_id: &str, actor: &str, lines: &[RecordRef]) {
        self.set_lines_status(task_id, actor, lines, DecisionStatus::Declined);
    }

    fn set_lines_status(
        &mut self,
        task_id: &str,
        actor: &str,
        lines: &[RecordRef],
        status: DecisionStatus,
    ) {
        let live = self
            .task(task_id)
            .is_some_and(|task| task.is_live_for(self.current_step, actor));
        if !live {
            return;
        }
        for ra in self.record_agreements.iter_mut() {
            if ra.task_id == task_id && lines.contains(&ra.related_record) {
                ra.set_status(status);
            }
        }
    }

    pub fn set_task_comments(&mut self, task_id: &str, comments: Option<String>) -> Result<()> {
        self.task_mut(task_id)?.comments = comments;
        Ok(())
    }
}
