// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::schedule::{PermissionMode, RunId, RunTrigger, ScheduleId};

#[test]
fn fresh_budget_has_no_history() {
    let b = Budget::fresh_default(1_000);
    assert_eq!(b.hop_count, 0);
    assert!(b.ancestor_chain.is_empty());
    assert_eq!(b.ttl, 1_000 + Budget::DEFAULT_TTL_MS);
    assert_eq!(b.call_budget_remaining, Budget::DEFAULT_CALL_BUDGET);
}

#[test]
fn derive_extends_chain_and_spends_credit() {
    let parent_id = MessageId::from_string("msg-parent");
    let b = Budget::fresh(1_000, 4, 60_000, 2);
    let derived = b.derive(parent_id);
    assert_eq!(derived.hop_count, 1);
    assert_eq!(derived.ancestor_chain, vec![parent_id]);
    assert_eq!(derived.ttl, b.ttl);
    assert_eq!(derived.call_budget_remaining, 1);

    let grandchild = derived.derive(MessageId::from_string("msg-child"));
    assert_eq!(grandchild.hop_count, 2);
    assert_eq!(grandchild.ancestor_chain.len(), 2);
    assert_eq!(grandchild.call_budget_remaining, 0);
}

#[test]
fn hop_count_always_equals_chain_length() {
    let mut b = Budget::fresh_default(0);
    for i in 0..5 {
        b = b.derive(MessageId::from_string(format!("msg-{i}")));
        assert_eq!(b.hop_count as usize, b.ancestor_chain.len());
    }
}

#[test]
fn expiry_is_inclusive_of_deadline() {
    let b = Budget::fresh(1_000, 8, 500, 10);
    assert!(!b.is_expired(1_499));
    assert!(b.is_expired(1_500));
    assert_eq!(b.ttl_remaining_ms(1_200), 300);
    assert_eq!(b.ttl_remaining_ms(9_999), 0);
}

#[test]
fn payload_text_round_trips_tagged() {
    let p = Payload::text("ping");
    let json = serde_json::to_value(&p).unwrap();
    assert_eq!(json["kind"], "text");
    assert_eq!(json["content"], "ping");
    let back: Payload = serde_json::from_value(json).unwrap();
    assert_eq!(back, p);
}

#[test]
fn payload_pulse_dispatch_round_trips() {
    let p = Payload::PulseDispatch(PulseDispatch {
        schedule_id: ScheduleId::from_string("sch-1"),
        run_id: RunId::from_string("run-1"),
        prompt: "hello".into(),
        cwd: Some("/tmp/a".into()),
        permission_mode: PermissionMode::Default,
        schedule_name: "nightly".into(),
        cron: "*/1 * * * *".into(),
        trigger: RunTrigger::Scheduled,
    });
    let json = serde_json::to_string(&p).unwrap();
    let back: Payload = serde_json::from_str(&json).unwrap();
    assert_eq!(back, p);
    assert!(back.as_pulse_dispatch().is_some());
}

#[test]
fn unknown_payload_kind_falls_back_to_custom() {
    let raw = r#"{"kind":"webhook_ping","url":"http://localhost"}"#;
    let p: Payload = serde_json::from_str(raw).unwrap();
    match &p {
        Payload::Custom(v) => assert_eq!(v["kind"], "webhook_ping"),
        other => panic!("expected custom payload, got {other:?}"),
    }
    // Opaque blob survives re-serialization unchanged.
    let again = serde_json::to_string(&p).unwrap();
    let v: serde_json::Value = serde_json::from_str(&again).unwrap();
    assert_eq!(v["url"], "http://localhost");
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// However a budget is derived, the hop count tracks the chain
        /// length and the TTL deadline never moves.
        #[test]
        fn derivation_preserves_invariants(
            depth in 1usize..12,
            ttl_ms in 1_000u64..1_000_000,
            credits in 0u32..20,
        ) {
            let mut budget = Budget::fresh(0, 64, ttl_ms, credits);
            let ttl = budget.ttl;
            for i in 0..depth {
                budget = budget.derive(MessageId::from_string(format!("msg-p{i}")));
                prop_assert_eq!(budget.hop_count as usize, budget.ancestor_chain.len());
                prop_assert_eq!(budget.ttl, ttl);
            }
            prop_assert_eq!(
                budget.call_budget_remaining,
                credits.saturating_sub(depth as u32)
            );
        }
    }
}

#[test]
fn envelope_serializes_camel_case() {
    let env = RelayEnvelope {
        id: MessageId::from_string("msg-1"),
        subject: Subject::parse("relay.agent.s1").unwrap(),
        from: "relay.human.console.c1".into(),
        reply_to: None,
        budget: Budget::fresh_default(0),
        created_at: 42,
        payload: Payload::text("hi"),
    };
    let json = serde_json::to_value(&env).unwrap();
    assert_eq!(json["createdAt"], 42);
    assert!(json.get("replyTo").is_none());
    assert_eq!(json["budget"]["maxHops"], 8);
}
