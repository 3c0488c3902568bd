mod common;

use agreement_workflow::error::{AgreementError, ValidationError};
use agreement_workflow::facade::Agreeable;
use agreement_workflow::process::ProcessStatus;
use agreement_workflow::route::RouteOwner;
use common::{PaymentRequest, harness};

#[test]
fn resubmission_copies_the_previous_route() -> anyhow::Result<()> {
    let h = harness()?;
    let request = PaymentRequest::new("pr-20");
    let record = request.record_ref();

    request.send_to_approve(&h.service)?;
    h.service.add_route_line(&record, 1, vec!["alice".into()])?;
    h.service
        .add_route_line(&record, 2, vec!["bob".into(), "carol".into()])?;
    request.start_approving(&h.service)?;
    let first = request.decline(&h.service, "alice")?;
    assert_eq!(first.status, ProcessStatus::Declined);

    let second = request.send_to_approve(&h.service)?;
    assert_ne!(second.id, first.id);
    assert!(request.has_route(&h.service)?);
    assert_eq!(second.route.len(), first.route.len());
    for (copy, original) in second.route.iter().zip(&first.route) {
        assert_eq!(copy.step_index, original.step_index);
        assert_eq!(copy.approvers, original.approvers);
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.owner, RouteOwner::Process(second.id.clone()));
    }

    // changing the new route leaves the historical snapshot alone
    h.service.add_route_line(&record, 3, vec!["dave".into()])?;
    let history = h.service.history(&record)?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first.id);
    assert_eq!(history[0].route.len(), 2);
    assert_eq!(history[1].route.len(), 3);

    Ok(())
}

#[test]
fn default_route_is_assigned_to_draft() -> anyhow::Result<()> {
    let h = harness()?;
    let request = PaymentRequest::new("pr-21");
    let record = request.record_ref();

    h.service
        .create_route("adhoc", false, vec![(1, vec!["zoe".into()])])?;
    let default = h.service.create_route(
        "finance",
        true,
        vec![(1, vec!["alice".into()]), (2, vec!["bob".into()])],
    )?;
    assert_eq!(h.service.routes()?.len(), 2);
    assert_eq!(h.service.default_route()?.map(|r| r.id), Some(default.id.clone()));

    request.send_to_approve(&h.service)?;
    let process = h.service.assign_default_route(&record)?;
    assert_eq!(process.route.len(), 2);
    assert!(process.route.iter().all(|line| line.owner == RouteOwner::Process(process.id.clone())));

    // the shared route is untouched by the copy
    assert_eq!(h.service.route(&default.id)?, default);

    request.start_approving(&h.service)?;
    request.approve(&h.service, "alice")?;
    let process = request.approve(&h.service, "bob")?;
    assert_eq!(process.status, ProcessStatus::Approved);

    let err = h.service.assign_route(&record, &default.id).unwrap_err();
    assert!(matches!(err, AgreementError::InvalidState(_)));

    Ok(())
}

#[test]
fn invalid_route_lines_are_rejected() -> anyhow::Result<()> {
    let h = harness()?;
    let request = PaymentRequest::new("pr-22");

    let err = h
        .service
        .create_route("broken", false, vec![(0, vec!["alice".into()])])
        .unwrap_err();
    assert!(matches!(
        err,
        AgreementError::Validation(ValidationError::InvalidStepIndex(0))
    ));
    assert!(h.service.routes()?.is_empty());

    request.send_to_approve(&h.service)?;
    let err = h
        .service
        .add_route_line(&request.record_ref(), 1, vec![])
        .unwrap_err();
    assert!(matches!(
        err,
        AgreementError::Validation(ValidationError::NoApprovers(1))
    ));
    assert!(!request.has_route(&h.service)?);

    Ok(())
}

#[test]
fn deleting_a_process_drops_it_from_history() -> anyhow::Result<()> {
    let h = harness()?;
    let request = PaymentRequest::new("pr-23");
    let record = request.record_ref();

    let first = request.send_to_approve(&h.service)?;
    request.cancel(&h.service)?;
    let second = request.send_to_approve(&h.service)?;

    h.service.delete_process(&second.id)?;

    let history = h.service.history(&record)?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first.id);
    assert_eq!(request.active_status(&h.service)?, Some(ProcessStatus::Canceled));
    assert!(h.service.store().process(&second.id)?.is_none());

    let err = h.service.delete_process(&second.id).unwrap_err();
    assert!(matches!(err, AgreementError::NotFound { .. }));

    Ok(())
}

#[test]
fn comments_are_kept_on_the_task() -> anyhow::Result<()> {
    let h = harness()?;
    let request = PaymentRequest::new("pr-24");
    let record = request.record_ref();

    request.send_to_approve(&h.service)?;
    h.service.add_route_line(&record, 1, vec!["alice".into()])?;
    request.start_approving(&h.service)?;

    let process = h.service.set_comments(&record, "alice", "checked invoice")?;
    assert_eq!(process.tasks[0].comments.as_deref(), Some("checked invoice"));

    let err = h.service.set_comments(&record, "bob", "n/a").unwrap_err();
    assert!(matches!(err, AgreementError::Permission(_)));

    Ok(())
}
