//! Integration tests for the active timer.
//!
//! Tests cover:
//! - select/start/stop transitions and their failures
//! - accrual into project totals and work-program splits
//! - archiving a running project
//! - clock skew, concurrent stops, and starts racing an archive

mod common;

use time::Duration;

use common::*;

#[tokio::test]
async fn test_stop_credits_elapsed_time() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;
    let program = add_test_program(&db, "Design").await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, Some(program.id)).await?;
    clock.advance(Duration::seconds(125));
    let accrual = db.stop_timer(&user).await?;

    assert_eq!(accrual.project_id, project.id);
    assert_eq!(accrual.program_id, Some(program.id));
    assert_eq!(accrual.elapsed, Duration::seconds(125));

    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::seconds(125));

    let splits = db.get_project_programs(&user, project.id).await?;
    assert_eq!(splits.len(), 1);
    assert_eq!(splits[0].program_id, program.id);
    assert_eq!(splits[0].program_name, "Design");
    assert_eq!(splits[0].total_time, Duration::seconds(125));

    let timer = db.get_timer(&user).await?;
    assert_eq!(timer.state(), TimerState::Selected { project_id: project.id });
    assert!(timer.last_started_at.is_none());
    Ok(())
}

#[tokio::test]
async fn test_time_without_program_is_not_split() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, None).await?;
    clock.advance(Duration::minutes(10));
    db.stop_timer(&user).await?;

    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::minutes(10));
    assert!(db.get_project_programs(&user, project.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_splits_never_exceed_project_total() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;
    let design = add_test_program(&db, "Design").await;
    let review = add_test_program(&db, "Review").await;

    db.select_project(&user, project.id).await?;
    let cycles = [
        (Some(design.id), 30),
        (None, 45),
        (Some(review.id), 20),
        (Some(design.id), 15),
        (None, 5),
    ];
    let mut previous_total = Duration::ZERO;
    for (program, seconds) in cycles {
        db.start_timer(&user, program).await?;
        clock.advance(Duration::seconds(seconds));
        db.stop_timer(&user).await?;

        let total = db.get_project(&user, project.id).await?.expect("project").total_time;
        assert!(total >= previous_total, "project total decreased");
        let split_sum = db
            .get_project_programs(&user, project.id)
            .await?
            .iter()
            .fold(Duration::ZERO, |sum, split| sum + split.total_time);
        assert!(split_sum <= total, "splits {split_sum} exceed total {total}");
        previous_total = total;
    }

    assert_eq!(previous_total, Duration::seconds(115));
    let splits = db.get_project_programs(&user, project.id).await?;
    let design_split = splits.iter().find(|s| s.program_id == design.id).expect("design");
    let review_split = splits.iter().find(|s| s.program_id == review.id).expect("review");
    assert_eq!(design_split.total_time, Duration::seconds(45));
    assert_eq!(review_split.total_time, Duration::seconds(20));
    Ok(())
}

#[tokio::test]
async fn test_start_while_running_fails_and_keeps_start_time() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.select_project(&user, project.id).await?;
    let started = db.start_timer(&user, None).await?;
    clock.advance(Duration::minutes(3));

    let err = db.start_timer(&user, None).await.unwrap_err();
    assert!(err.is_invalid_state(), "unexpected error: {err}");
    assert_eq!(err.to_string(), "invalid state: project is already started");

    let timer = db.get_timer(&user).await?;
    assert_eq!(timer.last_started_at, started.last_started_at);
    assert_eq!(timer.last_started_at, Some(T0));
    Ok(())
}

#[tokio::test]
async fn test_stop_while_not_running_changes_nothing() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, None).await?;
    clock.advance(Duration::seconds(60));
    db.stop_timer(&user).await?;
    clock.advance(Duration::seconds(60));

    let err = db.stop_timer(&user).await.unwrap_err();
    assert!(err.is_invalid_state());
    assert_eq!(err.to_string(), "invalid state: project is already stopped");

    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::seconds(60));
    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_without_selected_project() -> anyhow::Result<()> {
    let (db, _clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;

    let err = db.start_timer(&user, None).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid state: no active project");
    let err = db.stop_timer(&user).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid state: no active project");

    assert_eq!(db.get_timer(&user).await?.state(), TimerState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_select_requires_owned_project() -> anyhow::Result<()> {
    let (db, _clock, _dir) = create_test_db().await;
    let alice = add_test_user(&db, "alice", Role::Employee).await;
    let bob = add_test_user(&db, "bob", Role::Employee).await;
    let bobs_project = add_test_project(&db, &bob, "Bob's", &[]).await;

    let err = db.select_project(&alice, bobs_project.id).await.unwrap_err();
    assert!(err.is_not_found());
    let err = db.select_project(&alice, 9999).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(db.get_timer(&alice).await?.state(), TimerState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_select_while_running_is_rejected() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let first = add_test_project(&db, &user, "First", &[]).await;
    let second = add_test_project(&db, &user, "Second", &[]).await;

    db.select_project(&user, first.id).await?;
    db.start_timer(&user, None).await?;
    clock.advance(Duration::seconds(40));

    let err = db.select_project(&user, second.id).await.unwrap_err();
    assert!(err.is_invalid_state());

    db.stop_timer(&user).await?;
    let first = db.get_project(&user, first.id).await?.expect("first");
    let second_after = db.get_project(&user, second.id).await?.expect("second");
    assert_eq!(first.total_time, Duration::seconds(40));
    assert_eq!(second_after.total_time, Duration::ZERO);

    // Once stopped, switching is allowed.
    let timer = db.select_project(&user, second.id).await?;
    assert_eq!(timer.state(), TimerState::Selected { project_id: second.id });
    Ok(())
}

#[tokio::test]
async fn test_unknown_program_is_not_found() -> anyhow::Result<()> {
    let (db, _clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.select_project(&user, project.id).await?;
    let err = db.start_timer(&user, Some(42)).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!db.get_timer(&user).await?.in_work);
    Ok(())
}

#[tokio::test]
async fn test_archiving_running_project_resets_timer() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;
    let program = add_test_program(&db, "Design").await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, Some(program.id)).await?;
    clock.advance(Duration::minutes(15));

    let archived = db.archive_project(&user, project.id).await?;
    assert!(archived.is_archived);

    let timer = db.get_timer(&user).await?;
    assert_eq!(timer.state(), TimerState::Idle);
    assert!(!timer.in_work);
    assert_eq!(timer.project_id, None);
    assert_eq!(timer.current_program_id, None);

    clock.advance(Duration::minutes(15));
    let err = db.stop_timer(&user).await.unwrap_err();
    assert!(err.is_invalid_state());

    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::ZERO);
    assert!(db.get_project_programs(&user, project.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_archiving_other_project_leaves_timer_running() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let running = add_test_project(&db, &user, "Running", &[]).await;
    let other = add_test_project(&db, &user, "Other", &[]).await;

    db.select_project(&user, running.id).await?;
    db.start_timer(&user, None).await?;
    db.archive_project(&user, other.id).await?;
    clock.advance(Duration::seconds(30));

    db.stop_timer(&user).await?;
    let running = db.get_project(&user, running.id).await?.expect("project");
    assert_eq!(running.total_time, Duration::seconds(30));
    Ok(())
}

#[tokio::test]
async fn test_archived_project_cannot_be_selected() -> anyhow::Result<()> {
    let (db, _clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.archive_project(&user, project.id).await?;
    // Archiving twice is a no-op.
    let again = db.archive_project(&user, project.id).await?;
    assert!(again.is_archived);

    let err = db.select_project(&user, project.id).await.unwrap_err();
    assert!(err.is_invalid_state());
    Ok(())
}

#[tokio::test]
async fn test_clock_moving_backwards_credits_nothing() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, None).await?;
    clock.advance(Duration::minutes(-5));

    let accrual = db.stop_timer(&user).await?;
    assert_eq!(accrual.elapsed, Duration::ZERO);
    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::ZERO);
    Ok(())
}

#[tokio::test]
async fn test_status_reports_running_duration() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;

    assert_eq!(db.get_timer_status(&user).await?.state, TimerState::Idle);

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, None).await?;
    clock.advance(Duration::seconds(90));

    let status = db.get_timer_status(&user).await?;
    assert_eq!(status.running_for, Duration::seconds(90));
    assert!(matches!(status.state, TimerState::Running { project_id, .. } if project_id == project.id));
    Ok(())
}

#[tokio::test]
async fn test_timers_are_per_user() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let alice = add_test_user(&db, "alice", Role::Employee).await;
    let bob = add_test_user(&db, "bob", Role::Employee).await;
    let alices = add_test_project(&db, &alice, "Alice's", &[]).await;
    let bobs = add_test_project(&db, &bob, "Bob's", &[]).await;

    db.select_project(&alice, alices.id).await?;
    db.select_project(&bob, bobs.id).await?;
    db.start_timer(&alice, None).await?;
    clock.advance(Duration::seconds(10));
    db.start_timer(&bob, None).await?;
    clock.advance(Duration::seconds(10));
    db.stop_timer(&alice).await?;

    assert!(db.get_timer(&bob).await?.in_work);
    let alices = db.get_project(&alice, alices.id).await?.expect("alice");
    assert_eq!(alices.total_time, Duration::seconds(20));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stops_credit_once() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let project = add_test_project(&db, &user, "Website", &[]).await;
    let program = add_test_program(&db, "Design").await;

    db.select_project(&user, project.id).await?;
    db.start_timer(&user, Some(program.id)).await?;
    clock.advance(Duration::seconds(100));

    let (first, second) = tokio::join!(db.stop_timer(&user), db.stop_timer(&user));
    let outcomes = [first, second];
    let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one stop must win");
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(err.is_invalid_state(), "unexpected error: {err}");
        }
    }

    let project = db.get_project(&user, project.id).await?.expect("project");
    assert_eq!(project.total_time, Duration::seconds(100));
    let splits = db.get_project_programs(&user, project.id).await?;
    assert_eq!(splits[0].total_time, Duration::seconds(100));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_racing_archive_never_leaves_timer_running() -> anyhow::Result<()> {
    let (db, clock, _dir) = create_test_db().await;
    let user = add_test_user(&db, "alice", Role::Employee).await;
    let program = add_test_program(&db, "Design").await;

    for round in 0..40 {
        let project = add_test_project(&db, &user, &format!("Round {round}"), &[]).await;
        db.select_project(&user, project.id).await?;

        let (started, archived) = tokio::join!(
            db.start_timer(&user, Some(program.id)),
            db.archive_project(&user, project.id)
        );
        assert!(archived?.is_archived);
        if let Err(err) = started {
            assert!(err.is_invalid_state(), "round {round}: unexpected error: {err}");
        }

        let timer = db.get_timer(&user).await?;
        assert!(!timer.in_work, "round {round}: timer left running");
        assert_eq!(timer.project_id, None, "round {round}: timer kept archived project");
        assert_eq!(timer.state(), TimerState::Idle);

        clock.advance(Duration::seconds(1));
        let stored = db.get_project(&user, project.id).await?.expect("project");
        assert_eq!(stored.total_time, Duration::ZERO);
    }
    Ok(())
}
