use writetrail_core::{AuditOperation, Hlc};
use writetrail_engine::{
    BusError, CommitContext, CommitError, CommitStatus, DeferredAuditError, EntityState,
};
use writetrail_harness::fixtures::{Note, Project, Widget, NOTES, WIDGETS};
use writetrail_harness::TestApp;
use writetrail_storage::{CancelSignal, Storage, StorageError};

// ============================================================================
// Primary write failures
// ============================================================================

#[test]
fn primary_failure_leaves_no_trace() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    let w = app.uow.add(Widget::create("Sprocket", 1));
    let n = app.uow.add(Note::new("n-1", "x"));
    app.faults().fail_primary = true;

    let err = app.commit().unwrap_err();
    assert!(matches!(err, CommitError::PrimaryWrite(_)));
    assert!(err.is_retry_safe());
    assert_eq!(app.audit_count()?, 0);
    assert!(app.published().is_empty());
    assert_eq!(app.uow.state(w), Some(EntityState::Added));
    assert_eq!(app.uow.state(n), Some(EntityState::Added));
    assert!(app.uow.get::<Widget>(w).unwrap().id.is_none());

    // The same unit of work commits cleanly once storage recovers.
    app.faults().fail_primary = false;
    let outcome = app.commit()?;
    assert!(outcome.is_complete());
    assert_eq!(outcome.affected, 2);
    assert_eq!(outcome.audit_records, 2);
    assert_eq!(app.event_names(), vec!["WidgetCreated"]);
    Ok(())
}

#[test]
fn key_collision_rolls_back_whole_batch() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.add(Note::new("n-1", "first"));
    app.commit()?;
    let audit_before = app.audit_count()?;

    app.uow.add(Widget::create("Sprocket", 1));
    app.uow.add(Note::new("n-1", "duplicate"));
    let err = app.commit().unwrap_err();
    assert!(matches!(
        err,
        CommitError::PrimaryWrite(StorageError::KeyCollision { .. })
    ));

    assert!(app.storage().list_rows(WIDGETS)?.is_empty());
    assert_eq!(app.storage().list_rows(NOTES)?.len(), 1);
    assert_eq!(app.audit_count()?, audit_before);
    assert!(app.published().is_empty());
    Ok(())
}

#[test]
fn validation_failure_aborts_before_write() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.add(Widget::create("Sprocket", 1));
    let p = app.uow.add(Project::new("  ", "Oslo"));

    let err = app.commit().unwrap_err();
    assert!(matches!(err, CommitError::Validation(_)));
    assert_eq!(app.faults().primary_attempts, 0);
    assert_eq!(app.audit_count()?, 0);

    app.uow.get_mut::<Project>(p).unwrap().title = "Harbour".into();
    let outcome = app.commit()?;
    assert_eq!(outcome.affected, 2);
    Ok(())
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn cancellation_during_primary_write_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    let h = app.uow.add(Widget::create("Sprocket", 1));
    let cancel = CancelSignal::new();
    app.faults().cancel_mid_write = Some(cancel.clone());

    let ctx = CommitContext::new(app.actor, Hlc::new(1_700_000_000_000, 0)).with_cancel(cancel);
    let err = app.uow.commit_with(ctx).unwrap_err();
    assert!(matches!(err, CommitError::Cancelled));
    assert_eq!(app.faults().primary_attempts, 1);
    assert!(app.storage().list_rows(WIDGETS)?.is_empty());
    assert_eq!(app.audit_count()?, 0);
    assert!(app.published().is_empty());
    assert_eq!(app.uow.state(h), Some(EntityState::Added));
    Ok(())
}

#[test]
fn cancellation_before_start_skips_storage() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.add(Widget::create("Sprocket", 1));
    let cancel = CancelSignal::new();
    cancel.cancel();

    let ctx = CommitContext::new(app.actor, Hlc::new(1_700_000_000_000, 0)).with_cancel(cancel);
    assert!(matches!(app.uow.commit_with(ctx), Err(CommitError::Cancelled)));
    assert_eq!(app.faults().primary_attempts, 0);
    Ok(())
}

// ============================================================================
// Deferred audit failures
// ============================================================================

#[test]
fn deferred_failure_reports_incomplete_audit() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    let h = app.uow.add(Widget::create("Sprocket", 1));
    app.faults().fail_append = true;

    let outcome = app.commit()?;
    match &outcome.status {
        CommitStatus::AuditIncomplete {
            error,
            missing_records,
        } => {
            assert_eq!(*missing_records, 1);
            assert!(matches!(error, DeferredAuditError::Write(_)));
        }
        other => panic!("expected AuditIncomplete, got {other:?}"),
    }
    assert!(!outcome.is_retry_safe());
    assert_eq!(outcome.affected, 1);

    // Primary data is durable, its Create record is not.
    let id = app.uow.get::<Widget>(h).unwrap().id.expect("key assigned");
    assert!(app.storage().get_row(WIDGETS, &Widget::key(id))?.is_some());
    assert!(app.storage().get_audit_for_entity(WIDGETS, &Widget::key(id))?.is_empty());
    assert!(app.published().is_empty());
    assert_eq!(app.uow.state(h), Some(EntityState::Unchanged));
    Ok(())
}

#[test]
fn deferred_failure_keeps_atomic_records() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.add(Widget::create("Sprocket", 1));
    app.uow.add(Note::new("n-1", "x"));
    app.faults().fail_append = true;

    let outcome = app.commit()?;
    assert!(matches!(outcome.status, CommitStatus::AuditIncomplete { .. }));
    assert_eq!(outcome.audit_records, 1);

    let audit = app.audit_for(outcome.correlation_id)?;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].table(), NOTES);
    assert_eq!(audit[0].operation(), AuditOperation::Create);
    Ok(())
}

#[test]
fn events_held_by_audit_failure_go_out_next_commit() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.add(Widget::create("Sprocket", 1));
    app.faults().fail_append = true;
    app.commit()?;
    assert!(app.published().is_empty());

    app.faults().fail_append = false;
    let outcome = app.commit()?;
    assert!(outcome.is_complete());
    assert_eq!(outcome.affected, 0);
    assert_eq!(app.event_names(), vec!["WidgetCreated"]);
    // The lost Create record is not reconstructed.
    assert_eq!(app.audit_count()?, 0);
    Ok(())
}

// ============================================================================
// Dispatch failures
// ============================================================================

#[test]
fn dispatch_stops_at_first_rejection() -> Result<(), Box<dyn std::error::Error>> {
    let mut app = TestApp::new()?;
    app.uow.bus_mut().subscribe(|envelope| {
        if envelope.event.payload.get("name").and_then(|v| v.as_text()) == Some("A") {
            return Err(BusError::Rejected {
                event: envelope.event.name.clone(),
                reason: "A is embargoed".into(),
            });
        }
        Ok(())
    });
    app.uow.add(Widget::create("A", 1));
    app.uow.add(Widget::create("B", 1));

    let outcome = app.commit()?;
    match &outcome.status {
        CommitStatus::DispatchIncomplete { error, dropped } => {
            // The rejected event counts as neither published nor dropped.
            assert_eq!(outcome.events_published + dropped, 1);
            assert!(matches!(error, BusError::Rejected { .. }));
        }
        other => panic!("expected DispatchIncomplete, got {other:?}"),
    }
    let published = app.published();
    assert_eq!(published.len(), outcome.events_published);
    assert!(published
        .iter()
        .all(|e| e.event.payload.get("name").and_then(|v| v.as_text()) == Some("B")));

    // Data and audit are unaffected by the bus.
    assert_eq!(app.storage().list_rows(WIDGETS)?.len(), 2);
    assert_eq!(app.audit_count()?, 2);

    // Drained events are not redelivered.
    let next = app.commit()?;
    assert_eq!(next.events_published, 0);
    Ok(())
}
