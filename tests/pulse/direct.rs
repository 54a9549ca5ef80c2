// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Direct-mode scheduling specs
//!
//! The scheduler drives the runtime itself: run lifecycle, crash recovery,
//! and mid-stream cancellation.

use crate::prelude::*;

// =============================================================================
// Scheduled run completes in direct mode
// =============================================================================

/// A tick creates one run that moves pending → running → completed, with
/// the streamed text as its summary and a measured duration.
#[tokio::test]
async fn scheduled_run_direct_mode() {
    let world = World::new(WorldOptions::default()).await;
    let schedule = world.seed_schedule("s1");
    world.runtime.set_event_delay(Duration::from_millis(20));

    let run = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Pending);

    world.wait_for_run_status(run.id, RunStatus::Running).await;
    // Let wall-clock pass on the controllable clock while the stream runs.
    world.clock.advance(Duration::from_millis(50));

    world.wait_for_run_status(run.id, RunStatus::Completed).await;
    let run = world.run(run.id);
    assert_eq!(run.output_summary.as_deref(), Some("hi"));
    assert!(run.duration_ms.unwrap() > 0);
    assert!(run.finished_at.unwrap() > run.started_at);
    assert_eq!(world.scheduler.get_active_run_count(), 0);
}

// =============================================================================
// Crash recovery
// =============================================================================

/// Runs left `running` by a crashed process are coerced to `failed` with
/// error "interrupted" when the scheduler boots.
#[tokio::test]
async fn crash_recovery_marks_interrupted_runs() {
    let world = World::new(WorldOptions::default()).await;
    let schedule = world.seed_schedule("s1");
    let crashed = world
        .pulse
        .create_run(schedule.id, RunTrigger::Scheduled, 100)
        .unwrap();
    world
        .pulse
        .update_run(
            crashed.id,
            RunPatch { status: Some(RunStatus::Running), ..Default::default() },
        )
        .unwrap();

    world.scheduler.start().await.unwrap();

    let still_running = world
        .pulse
        .list_runs(&RunFilter { status: Some(RunStatus::Running), ..Default::default() })
        .unwrap();
    assert!(still_running.is_empty());

    let recovered = world.run(crashed.id);
    assert_eq!(recovered.status, RunStatus::Failed);
    assert_eq!(recovered.error.as_deref(), Some("interrupted"));

    world.scheduler.stop().await;
}

// =============================================================================
// Cancellation mid-stream
// =============================================================================

/// Cancelling a run between stream events marks it `cancelled`, keeps the
/// chunks that already arrived, and stops reading the stream.
#[tokio::test]
async fn cancel_mid_stream() {
    let world = World::new(WorldOptions::default()).await;
    world.runtime.set_event_delay(Duration::from_millis(50));
    world.runtime.set_script(
        (0..10)
            .map(|i| StreamEvent::TextDelta { text: format!("chunk{i} ") })
            .chain([StreamEvent::Done {}])
            .collect(),
    );
    let schedule = world.seed_schedule("s1");

    let run = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap()
        .unwrap();
    world.wait_for_run_status(run.id, RunStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(180)).await;
    assert!(world.scheduler.cancel_run(run.id));

    world.wait_for_run_status(run.id, RunStatus::Cancelled).await;
    let run = world.run(run.id);
    let summary = run.output_summary.unwrap();
    assert!(summary.contains("chunk0") && summary.contains("chunk2"), "got {summary:?}");
    assert!(!summary.contains("chunk9"), "stream was read past cancellation: {summary:?}");
}

// =============================================================================
// Run status monotonicity
// =============================================================================

/// Observed statuses only ever follow the legal trajectories.
#[tokio::test]
async fn run_statuses_are_monotonic() {
    let world = World::new(WorldOptions::default()).await;
    let schedule = world.seed_schedule("s1");

    let run = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap()
        .unwrap();
    world.wait_for_run_status(run.id, RunStatus::Completed).await;

    // Terminal runs reject every further transition.
    for next in [RunStatus::Pending, RunStatus::Running, RunStatus::Cancelled] {
        let result = world.pulse.update_run(
            run.id,
            RunPatch { status: Some(next), ..Default::default() },
        );
        assert!(result.is_err(), "completed → {next} must be rejected");
    }
}
