//! Integration contract for business records taking part in approvals
//!
//! A business type opts in by naming itself as a [`RecordRef`] and, when it
//! has sub-lines that are approved individually, the attribute that lists
//! them. Every workflow action is then available on the record itself.
use crate::agreement::Agreement;
use crate::error::Result;
use crate::process::{AgreementProcess, ProcessStatus};
use crate::record_agreement::RecordAgreement;
use crate::service::AgreementService;
use crate::types::RecordRef;

pub trait Agreeable {
    fn record_ref(&self) -> RecordRef;

    /// Name of the sub-line collection the record's handler can enumerate.
    fn lines_attribute(&self) -> Option<&str> {
        None
    }

    fn agreement(&self, service: &AgreementService) -> Result<Option<Agreement>> {
        service.agreement(&self.record_ref())
    }

    fn active_process(&self, service: &AgreementService) -> Result<Option<AgreementProcess>> {
        service.active_process(&self.record_ref())
    }

    fn active_status(&self, service: &AgreementService) -> Result<Option<ProcessStatus>> {
        service.active_status(&self.record_ref())
    }

    fn has_route(&self, service: &AgreementService) -> Result<bool> {
        service.has_route(&self.record_ref())
    }

    fn send_to_approve(&self, service: &AgreementService) -> Result<AgreementProcess> {
        service.send_to_approve(&self.record_ref(), self.lines_attribute())
    }

    fn start_approving(&self, service: &AgreementService) -> Result<AgreementProcess> {
        service.start_approving(&self.record_ref())
    }

    fn open_active_process(&self, service: &AgreementService) -> Result<AgreementProcess> {
        service.open_active_process(&self.record_ref())
    }

    fn open_pending_lines(
        &self,
        service: &AgreementService,
        actor: &str,
    ) -> Result<Vec<RecordAgreement>> {
        service.open_pending_lines(&self.record_ref(), actor)
    }

    fn approve(&self, service: &AgreementService, actor: &str) -> Result<AgreementProcess> {
        service.approve(&self.record_ref(), actor)
    }

    fn decline(&self, service: &AgreementService, actor: &str) -> Result<AgreementProcess> {
        service.decline(&self.record_ref(), actor)
    }

    fn approve_lines(
        &self,
        service: &AgreementService,
        actor: &str,
        lines: &[RecordRef],
    ) -> Result<AgreementProcess> {
        service.approve_lines(&self.record_ref(), actor, lines)
    }

    fn decline_lines(
        &self,
        service: &AgreementService,
        actor: &str,
        lines: &[RecordRef],
    ) -> Result<AgreementProcess> {
        service.decline_lines(&self.record_ref(), actor, lines)
    }

    fn cancel(&self, service: &AgreementService) -> Result<Option<AgreementProcess>> {
        service.cancel(&self.record_ref())
    }
}
