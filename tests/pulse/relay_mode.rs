// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relay-mode scheduling specs
//!
//! The scheduler publishes `pulse_dispatch` envelopes; the agent adapter
//! finalizes the runs.

use crate::prelude::*;

// =============================================================================
// No receiver
// =============================================================================

/// With the relay on but nothing subscribed, a dispatch fails fast: the run
/// goes pending → failed with "no_receiver" and the envelope dead-letters.
#[tokio::test]
async fn relay_mode_without_subscriber_fails_fast() {
    let world = World::new(WorldOptions {
        relay_enabled: true,
        adapter: false,
        ..Default::default()
    })
    .await;
    let schedule = world.seed_schedule("s1");

    let run = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("no_receiver"));

    // The publish left a dead-lettered span on the dispatch subject.
    let spans = world
        .trace
        .list_spans(&SpanFilter {
            subject: Some(format!("relay.system.pulse.{}", schedule.id)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::DeadLettered);
}

// =============================================================================
// Full relay dispatch
// =============================================================================

/// With the agent adapter subscribed, the run is finalized by the adapter:
/// pending → running → completed with the streamed summary, and the
/// dispatch span terminates `processed`.
#[tokio::test]
async fn relay_mode_with_adapter_completes_the_run() {
    let world = World::new(WorldOptions {
        relay_enabled: true,
        adapter: true,
        ..Default::default()
    })
    .await;
    let schedule = world.seed_schedule("s1");

    let run = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(run.status, RunStatus::Failed);

    world.wait_for_run_status(run.id, RunStatus::Completed).await;
    let run = world.run(run.id);
    assert_eq!(run.output_summary.as_deref(), Some("hi"));

    // The adapter saw the dispatch with the run id as session id and the
    // unattended-run context block.
    let sent = world.runtime.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].session_id, run.id.as_str());
    assert_eq!(sent[0].content, "hello");
    let prompt = sent[0].system_prompt_append.as_deref().unwrap();
    assert!(prompt.contains("Job: s1"));
    assert!(prompt.contains("unattended"));

    // Dispatch span: pending → delivered → processed.
    let trace = world.trace.clone();
    let spans = move || {
        trace
            .list_spans(&SpanFilter {
                subject: Some(format!("relay.system.pulse.{}", schedule.id)),
                ..Default::default()
            })
            .unwrap()
    };
    wait_for({
        let spans = spans.clone();
        move || spans().first().map(|s| s.status) == Some(SpanStatus::Processed)
    })
    .await;
    let span = spans().remove(0);
    assert!(span.delivered_at.is_some());
    assert!(span.processed_at.is_some());

    // One publish span, one delivery attempt: the adapter's subscription.
    let attempts = world.trace.get_attempts(span.message_id).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].parent_span_id, Some(span.span_id));
    assert_eq!(attempts[0].status, SpanStatus::Delivered);
    assert_eq!(attempts[0].to_endpoint.as_deref(), Some("relay.system.pulse.>"));
}

// =============================================================================
// Mid-flight pause is respected
// =============================================================================

/// A tick that fires after the schedule was paused creates nothing.
#[tokio::test]
async fn paused_schedule_skips_ticks() {
    let world = World::new(WorldOptions {
        relay_enabled: true,
        adapter: true,
        ..Default::default()
    })
    .await;
    let schedule = world.seed_schedule("s1");
    world
        .pulse
        .update_schedule(
            schedule.id,
            dork_store::SchedulePatch {
                status: Some(ScheduleStatus::Paused),
                ..Default::default()
            },
            world.clock.epoch_ms(),
        )
        .unwrap();

    let skipped = world
        .scheduler
        .dispatch(schedule.id, RunTrigger::Scheduled)
        .await
        .unwrap();
    assert!(skipped.is_none());
    assert!(world
        .pulse
        .list_runs(&RunFilter::default())
        .unwrap()
        .is_empty());
}
