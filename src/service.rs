//! Service layer API for agreement workflow operations
use crate::agreement::Agreement;
use crate::config::StoreConfig;
use crate::error::{AgreementError, Result};
use crate::process::{AgreementProcess, ProcessStatus, Transition};
use crate::record_agreement::RecordAgreement;
use crate::registry::RecordRegistry;
use crate::route::RouteRef;
use crate::store::{AgreementStore, Loaded};
use crate::types::{RecordRef, UserId};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct AgreementService {
    store: AgreementStore,
    registry: RecordRegistry,
    // serializes mutating operations of this service; writers sharing the
    // database are caught by the store's version check at commit
    write_lock: Mutex<()>,
}

fn ensure_status(process: &AgreementProcess, expected: ProcessStatus) -> Result<()> {
    if process.status != expected {
        return Err(AgreementError::InvalidState(format!(
            "There are no active approval processes in {expected:?} status. Current status: {:?}",
            process.status
        )));
    }
    Ok(())
}

fn waiting_task(process: &AgreementProcess, actor: &str, action: &str) -> Result<String> {
    process
        .waiting_task_for(actor)
        .map(|task| task.id.clone())
        .ok_or_else(|| AgreementError::Permission(format!("You don't need to {action}")))
}

fn no_active_process(record: &RecordRef) -> AgreementError {
    AgreementError::InvalidState(format!(
        "There are no active approval processes at the moment for {record}"
    ))
}

impl AgreementService {
    pub fn new(instance: Arc<sled::Db>, registry: RecordRegistry) -> Self {
        Self {
            store: AgreementStore::new(instance),
            registry,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open(config: &StoreConfig, registry: RecordRegistry) -> Result<Self> {
        let instance = Arc::new(config.open()?);
        let mut service = Self::new(instance, registry);
        service.store = service.store.set_flush_on_commit(config.flush_on_commit);
        Ok(service)
    }

    pub fn store(&self) -> &AgreementStore {
        &self.store
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| AgreementError::LockPoisoned)
    }

    fn load_process(&self, process_id: &str) -> Result<Loaded<AgreementProcess>> {
        self.store
            .load_process(process_id)?
            .ok_or_else(|| AgreementError::NotFound {
                kind: "process",
                id: process_id.to_string(),
            })
    }

    fn latest_process(&self, agreement: &Agreement) -> Result<Option<Loaded<AgreementProcess>>> {
        agreement
            .latest_process()
            .map(|id| self.load_process(id))
            .transpose()
    }

    fn load_active(
        &self,
        record: &RecordRef,
    ) -> Result<Option<(Loaded<Agreement>, Loaded<AgreementProcess>)>> {
        let Some(agreement) = self.store.load_agreement_for(record)? else {
            return Ok(None);
        };
        Ok(self
            .latest_process(&agreement)?
            .map(|process| (agreement, process)))
    }

    /// Runs `apply` against the record's active process as one unit: related
    /// record callbacks are dispatched and the process is stored only if
    /// `apply` succeeds and nobody else changed the process meanwhile.
    fn transition<F>(&self, record: &RecordRef, apply: F) -> Result<AgreementProcess>
    where
        F: FnOnce(&mut AgreementProcess, &mut Transition) -> Result<()>,
    {
        let _guard = self.lock()?;
        let (agreement, loaded) = self
            .load_active(record)?
            .ok_or_else(|| no_active_process(record))?;
        let mut work = self.store.begin();
        work.expect_unchanged(&agreement);
        work.expect_unchanged(&loaded);
        let mut process = loaded.into_inner();

        let mut cx = Transition::new(&agreement, &self.registry);
        if let Err(err) = apply(&mut process, &mut cx) {
            log::warn!("operation on {record} rejected: {err}");
            return Err(err);
        }
        // a writer outside this service may have moved the process on
        self.store.verify(&work)?;
        self.registry.dispatch(cx.effects())?;

        work.put_process(&process)?;
        self.store.commit(work)?;
        Ok(process)
    }

    // READS

    pub fn agreement(&self, record: &RecordRef) -> Result<Option<Agreement>> {
        Ok(self.store.agreement_for(record)?)
    }

    /// The most recently created process of the record, whatever its status.
    pub fn active_process(&self, record: &RecordRef) -> Result<Option<AgreementProcess>> {
        Ok(self
            .load_active(record)?
            .map(|(_, process)| process.into_inner()))
    }

    pub fn active_status(&self, record: &RecordRef) -> Result<Option<ProcessStatus>> {
        Ok(self.active_process(record)?.map(|process| process.status))
    }

    pub fn has_route(&self, record: &RecordRef) -> Result<bool> {
        Ok(self
            .active_process(record)?
            .is_some_and(|process| process.has_route()))
    }

    /// Every process run for the record, oldest first.
    pub fn history(&self, record: &RecordRef) -> Result<Vec<AgreementProcess>> {
        let Some(agreement) = self.store.agreement_for(record)? else {
            return Ok(vec![]);
        };
        agreement
            .processes
            .iter()
            .map(|id| self.load_process(id).map(Loaded::into_inner))
            .collect()
    }

    pub fn open_active_process(&self, record: &RecordRef) -> Result<AgreementProcess> {
        self.active_process(record)?
            .ok_or_else(|| no_active_process(record))
    }

    /// Record agreements the actor has to confirm at the current step.
    pub fn open_pending_lines(&self, record: &RecordRef, actor: &str) -> Result<Vec<RecordAgreement>> {
        let process = self.open_active_process(record)?;
        let pending: Vec<RecordAgreement> = process
            .pending_record_agreements(actor)
            .into_iter()
            .cloned()
            .collect();
        if pending.is_empty() {
            return Err(AgreementError::Permission(
                "You don't need to confirm".to_string(),
            ));
        }
        Ok(pending)
    }

    // WORKFLOW ACTIONS

    /// Opens a new draft process for the record. A route used by the previous
    /// run is copied into the new one.
    ///
    /// Fails with [`AgreementError::Conflict`] while another process is
    /// active, including one created concurrently through another service on
    /// the same database.
    pub fn send_to_approve(
        &self,
        record: &RecordRef,
        lines_attribute: Option<&str>,
    ) -> Result<AgreementProcess> {
        let _guard = self.lock()?;
        let existing = self.store.load_agreement_for(record)?;
        let previous = match &existing {
            Some(agreement) => self.latest_process(agreement)?,
            None => None,
        };
        if previous.as_ref().is_some_and(|p| p.status.is_active()) {
            log::warn!("{record} already has an active approval process");
            return Err(AgreementError::Conflict(
                "Can be only one active approval process".to_string(),
            ));
        }

        let mut work = self.store.begin();
        let mut agreement = match existing {
            Some(loaded) => {
                work.expect_unchanged(&loaded);
                loaded.into_inner()
            }
            None => {
                work.expect_no_agreement(record);
                Agreement::new(record.clone(), lines_attribute.map(String::from))?
            }
        };
        let mut process = AgreementProcess::new(agreement.id.clone())?;
        if let Some(previous) = &previous {
            process.copy_route_from(previous)?;
        }
        agreement.push_process(process.id.clone());

        work.put_agreement(&agreement)?;
        work.put_process(&process)?;
        self.store.commit(work)?;

        log::info!("process {} created for {record}", process.id);
        Ok(process)
    }

    pub fn start_approving(&self, record: &RecordRef) -> Result<AgreementProcess> {
        self.transition(record, |process, cx| {
            ensure_status(process, ProcessStatus::Draft)?;
            process.start(cx)
        })
    }

    /// Record-level approval of the actor's task at the current step.
    pub fn approve(&self, record: &RecordRef, actor: &str) -> Result<AgreementProcess> {
        self.transition(record, |process, cx| {
            ensure_status(process, ProcessStatus::InProgress)?;
            let task_id = waiting_task(process, actor, "approve")?;
            process.approve_task(&task_id, actor, cx)
        })
    }

    pub fn decline(&self, record: &RecordRef, actor: &str) -> Result<AgreementProcess> {
        self.transition(record, |process, cx| {
            ensure_status(process, ProcessStatus::InProgress)?;
            let task_id = waiting_task(process, actor, "decline")?;
            process.decline_task(&task_id, cx)
        })
    }

    pub fn approve_lines(
        &self,
        record: &RecordRef,
        actor: &str,
        lines: &[RecordRef],
    ) -> Result<AgreementProcess> {
        self.transition(record, |process, _| {
            ensure_status(process, ProcessStatus::InProgress)?;
            let task_id = waiting_task(process, actor, "approve")?;
            process.set_approve_by_lines(&task_id, actor, lines);
            Ok(())
        })
    }

    pub fn decline_lines(
        &self,
        record: &RecordRef,
        actor: &str,
        lines: &[RecordRef],
    ) -> Result<AgreementProcess> {
        self.transition(record, |process, _| {
            ensure_status(process, ProcessStatus::InProgress)?;
            let task_id = waiting_task(process, actor, "decline")?;
            process.set_decline_by_lines(&task_id, actor, lines);
            Ok(())
        })
    }

    pub fn set_comments(
        &self,
        record: &RecordRef,
        actor: &str,
        comments: impl Into<String>,
    ) -> Result<AgreementProcess> {
        let comments = comments.into();
        self.transition(record, |process, _| {
            ensure_status(process, ProcessStatus::InProgress)?;
            let task_id = waiting_task(process, actor, "comment")?;
            process.set_task_comments(&task_id, Some(comments))
        })
    }

    /// Cancels the active process. Does nothing when the record never had one.
    pub fn cancel(&self, record: &RecordRef) -> Result<Option<AgreementProcess>> {
        if self.active_process(record)?.is_none() {
            return Ok(None);
        }
        self.transition(record, |process, _| {
            process.cancel();
            Ok(())
        })
        .map(Some)
    }

    /// Deletes a process with everything it owns and drops it from its
    /// agreement's history.
    pub fn delete_process(&self, process_id: &str) -> Result<()> {
        let _guard = self.lock()?;
        let process = self.load_process(process_id)?;
        let mut work = self.store.begin();
        work.expect_unchanged(&process);
        if let Some(loaded) = self.store.load_agreement(&process.agreement_id)? {
            work.expect_unchanged(&loaded);
            let mut agreement = loaded.into_inner();
            agreement.remove_process(process_id);
            work.put_agreement(&agreement)?;
        }
        work.remove_process(process_id);
        self.store.commit(work)?;

        log::info!("process {process_id} deleted");
        Ok(())
    }

    // ROUTES

    pub fn create_route(
        &self,
        name: &str,
        is_default: bool,
        steps: Vec<(u32, Vec<UserId>)>,
    ) -> Result<RouteRef> {
        let route = RouteRef::new(name, is_default, steps)?;
        let _guard = self.lock()?;
        let mut work = self.store.begin();
        work.put_route(&route)?;
        self.store.commit(work)?;
        Ok(route)
    }

    pub fn route(&self, route_id: &str) -> Result<RouteRef> {
        self.store
            .route(route_id)?
            .ok_or_else(|| AgreementError::NotFound {
                kind: "route",
                id: route_id.to_string(),
            })
    }

    /// All routes, ordered by name.
    pub fn routes(&self) -> Result<Vec<RouteRef>> {
        let mut routes = self.store.routes()?;
        routes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(routes)
    }

    /// First route flagged as default, by name.
    pub fn default_route(&self) -> Result<Option<RouteRef>> {
        Ok(self.routes()?.into_iter().find(|route| route.is_default))
    }

    /// Copies a shared route into the record's draft process.
    pub fn assign_route(&self, record: &RecordRef, route_id: &str) -> Result<AgreementProcess> {
        let route = self.route(route_id)?;
        self.transition(record, |process, _| process.assign_route(&route))
    }

    pub fn assign_default_route(&self, record: &RecordRef) -> Result<AgreementProcess> {
        let route = self.default_route()?.ok_or_else(|| AgreementError::NotFound {
            kind: "route",
            id: "default".to_string(),
        })?;
        self.transition(record, |process, _| process.assign_route(&route))
    }

    /// Adds an ad-hoc step to the record's draft process.
    pub fn add_route_line(
        &self,
        record: &RecordRef,
        step_index: u32,
        approvers: Vec<UserId>,
    ) -> Result<AgreementProcess> {
        self.transition(record, |process, _| {
            process.add_route_line(step_index, approvers).map(|_| ())
        })
    }
}
