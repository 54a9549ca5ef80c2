// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus round-trip specs
//!
//! Agent messaging through the relay: replies, budgets, cycle guards, and
//! the adapter's concurrency gate.

use crate::prelude::*;
use dork_core::{Budget, MessageId, RelayEnvelope};

fn world_options() -> WorldOptions {
    WorldOptions { relay_enabled: true, adapter: true, ..Default::default() }
}

// =============================================================================
// Agent round-trip with reply
// =============================================================================

/// A message to a registered agent produces one response envelope per
/// stream event on the reply subject, each with a derived budget whose
/// ancestor chain points at the original message.
#[tokio::test]
async fn agent_reply_round_trip() {
    let world = World::new(world_options()).await;
    let agent_dir = world.root.join("a1");
    std::fs::create_dir_all(&agent_dir).unwrap();
    let manifest = world
        .mesh
        .register(&agent_dir, RegisterOverrides::default(), None, 0)
        .unwrap();

    world.runtime.set_script(vec![
        StreamEvent::TextDelta { text: "pong".into() },
        StreamEvent::Done {},
    ]);

    let relay = world.relay.as_ref().unwrap();
    let receipt = relay
        .publish(
            subj(&format!("relay.agent.{}", manifest.id)),
            Payload::text("ping"),
            PublishOptions {
                from: "relay.human.console.c1".into(),
                reply_to: Some(subj("relay.human.console.c1")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.delivered_to, 1);

    // At least two reply spans (text_delta + done), all in the original
    // message's trace, one hop deep.
    let trace = world.trace.clone();
    wait_for(move || {
        trace
            .list_spans(&SpanFilter {
                subject: Some("relay.human.console.c1".into()),
                ..Default::default()
            })
            .unwrap()
            .len()
            >= 2
    })
    .await;
    let replies = world
        .trace
        .list_spans(&SpanFilter {
            subject: Some("relay.human.console.c1".into()),
            ..Default::default()
        })
        .unwrap();
    for reply in &replies {
        assert_eq!(reply.trace_id, receipt.message_id);
        assert_eq!(reply.budget_hops_used, 1);
        assert_eq!(reply.from_endpoint, format!("relay.agent.{}", manifest.id));
    }

    // The inbound span terminates delivered-then-processed.
    let trace = world.trace.clone();
    let id = receipt.message_id;
    wait_for(move || {
        trace.get_span(id).unwrap().map(|s| s.status) == Some(SpanStatus::Processed)
    })
    .await;
    let span = world.trace.get_span(id).unwrap().unwrap();
    assert!(span.delivered_at.is_some());

    // The runtime session was keyed by the agent id, in its directory.
    let sent = world.runtime.sent_messages();
    assert_eq!(sent[0].session_id, manifest.id.as_str());
    assert_eq!(sent[0].cwd.as_deref(), Some(agent_dir.as_path()));
}

// =============================================================================
// Budget cycle guard
// =============================================================================

/// A derived publish whose id already appears in its ancestor chain is
/// rejected before any span is written.
#[tokio::test]
async fn budget_cycle_guard() {
    let world = World::new(WorldOptions { relay_enabled: true, ..Default::default() }).await;
    let relay = world.relay.as_ref().unwrap();
    let m1 = MessageId::from_string("msg-spec-m1");
    let m2 = MessageId::from_string("msg-spec-m2");

    relay
        .publish(
            subj("relay.agent.x"),
            Payload::text("e1"),
            PublishOptions { message_id: Some(m1), from: "spec".into(), ..Default::default() },
        )
        .await
        .unwrap();

    let derived = relay.default_budget().derive(m1);
    relay
        .publish(
            subj("relay.agent.y"),
            Payload::text("e2"),
            PublishOptions {
                message_id: Some(m2),
                budget: Some(derived.clone()),
                from: "spec".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = relay
        .publish(
            subj("relay.agent.z"),
            Payload::text("e3"),
            PublishOptions {
                message_id: Some(m1),
                budget: Some(derived.derive(m2)),
                from: "spec".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, dork_relay::RelayError::CycleDetected(id) if id == m1));
    assert_eq!(world.trace.metrics().unwrap().total_messages, 2);
}

/// Hop count always equals the ancestor chain length, and a chain driven
/// past `max_hops` is rejected.
#[tokio::test]
async fn budget_hops_track_the_chain() {
    let world = World::new(WorldOptions { relay_enabled: true, ..Default::default() }).await;
    let relay = world.relay.as_ref().unwrap();

    let mut budget = relay.default_budget();
    for i in 0..Budget::DEFAULT_MAX_HOPS {
        assert_eq!(budget.hop_count as usize, budget.ancestor_chain.len());
        budget = budget.derive(MessageId::from_string(format!("msg-hop-{i}")));
    }
    // hop_count now equals max_hops, which still publishes; one more
    // derivation crosses the limit.
    budget = budget.derive(MessageId::from_string("msg-hop-last"));
    let err = relay
        .publish(
            subj("relay.agent.deep"),
            Payload::text("too far"),
            PublishOptions { budget: Some(budget), from: "spec".into(), ..Default::default() },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, dork_relay::RelayError::BudgetExceeded(_)));
}

// =============================================================================
// Adapter concurrency cap
// =============================================================================

/// With `maxConcurrent = 2`, a third simultaneous delivery is refused with
/// `adapter_at_capacity` while the first two proceed.
#[tokio::test]
async fn adapter_concurrency_cap() {
    let world = World::new(WorldOptions {
        relay_enabled: true,
        adapter: true,
        adapter_max_concurrent: 2,
        ..Default::default()
    })
    .await;
    let adapter = world.adapter.as_ref().unwrap();
    world.runtime.set_event_delay(Duration::from_millis(50));

    let now = world.clock.epoch_ms();
    let envelope = |i: usize| RelayEnvelope {
        id: MessageId::new(),
        subject: subj(&format!("relay.agent.sess-{i}")),
        from: "relay.human.console.c1".into(),
        reply_to: None,
        budget: Budget::fresh_default(now),
        created_at: now,
        payload: Payload::text("go"),
    };

    let e1 = envelope(1);
    let e2 = envelope(2);
    let e3 = envelope(3);
    let a1 = Arc::clone(adapter);
    let a2 = Arc::clone(adapter);
    let first = tokio::spawn(async move { a1.deliver(&e1.subject.clone(), &e1, None).await });
    let second = tokio::spawn(async move { a2.deliver(&e2.subject.clone(), &e2, None).await });

    let gate = Arc::clone(adapter);
    wait_for(move || gate.status().active_count == 2).await;
    assert!(adapter.status().active_count <= 2);

    let third = adapter.deliver(&e3.subject.clone(), &e3, None).await;
    assert!(!third.success);
    assert_eq!(third.error.as_deref(), Some("adapter_at_capacity"));

    assert!(first.await.unwrap().success);
    assert!(second.await.unwrap().success);
    assert_eq!(adapter.status().active_count, 0);
}

// =============================================================================
// Trace law
// =============================================================================

/// `publish` → the trace rooted at the returned message id starts with
/// that message.
#[tokio::test]
async fn publish_roots_its_own_trace() {
    let world = World::new(WorldOptions { relay_enabled: true, ..Default::default() }).await;
    let relay = world.relay.as_ref().unwrap();
    let receipt = relay
        .publish(
            subj("relay.system.audit"),
            Payload::text("entry"),
            PublishOptions { from: "spec".into(), ..Default::default() },
        )
        .await
        .unwrap();
    let trace = world.trace.get_trace(receipt.message_id).unwrap();
    assert_eq!(trace[0].message_id, receipt.message_id);
}
