// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::adapter::Adapter;
use crate::relay::{PublishOptions, RelayCore};
use dork_core::{
    Budget, FakeClock, FakeRuntime, RelayConfig, RunTrigger, ScheduleStatus, SpanStatus,
};
use dork_mesh::{MeshRegistry, RegisterOverrides};
use dork_store::{Db, PulseStore, ScheduleInput, TraceStore};
use std::time::Duration;

struct Fixture {
    clock: FakeClock,
    runtime: Arc<FakeRuntime>,
    relay: Arc<RelayCore<FakeClock>>,
    pulse: PulseStore,
    adapter: Arc<AgentAdapter<FakeClock>>,
}

async fn fixture(mesh: Option<Arc<MeshRegistry>>, max_concurrent: usize) -> Fixture {
    let clock = FakeClock::new();
    let db = Db::open_in_memory().unwrap();
    let trace = TraceStore::new(db.clone());
    let pulse = PulseStore::new(db);
    let relay = Arc::new(RelayCore::new(clock.clone(), RelayConfig::default(), trace));
    let runtime = Arc::new(FakeRuntime::new());
    let adapter = AgentAdapter::new(
        Arc::clone(&runtime) as Arc<dyn dork_core::AgentRuntime>,
        mesh,
        Some(pulse.clone()),
        clock.clone(),
        AgentAdapterConfig { max_concurrent },
    );
    Arc::clone(&adapter).start(Arc::clone(&relay)).await.unwrap();
    Fixture { clock, runtime, relay, pulse, adapter }
}

fn subj(s: &str) -> Subject {
    Subject::parse(s).unwrap()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

fn schedule_input(name: &str) -> ScheduleInput {
    ScheduleInput {
        name: name.into(),
        prompt: "hello".into(),
        cron: "*/1 * * * *".into(),
        timezone: None,
        cwd: None,
        permission_mode: PermissionMode::Default,
        enabled: true,
        status: ScheduleStatus::Active,
        max_runtime: None,
    }
}

fn dispatch_payload(f: &Fixture, schedule_name: &str, cwd: Option<PathBuf>) -> (RunId, Payload) {
    let schedule = f.pulse.create_schedule(schedule_input(schedule_name), 0).unwrap();
    let run = f.pulse.create_run(schedule.id, RunTrigger::Scheduled, f.clock.epoch_ms()).unwrap();
    let payload = Payload::PulseDispatch(PulseDispatch {
        schedule_id: schedule.id,
        run_id: run.id,
        prompt: "hello".into(),
        cwd,
        permission_mode: PermissionMode::Default,
        schedule_name: schedule_name.into(),
        cron: "*/1 * * * *".into(),
        trigger: RunTrigger::Scheduled,
    });
    (run.id, payload)
}

#[tokio::test]
async fn start_connects_and_subscribes() {
    let f = fixture(None, 4).await;
    assert_eq!(f.adapter.status().state, AdapterState::Connected);
    assert_eq!(f.adapter.status().max_concurrent, 4);
    assert_eq!(f.relay.subscription_count(), 2);

    f.adapter.stop().await.unwrap();
    assert_eq!(f.adapter.status().state, AdapterState::Disconnected);
    assert_eq!(f.relay.subscription_count(), 0);
}

#[tokio::test]
async fn pulse_dispatch_completes_the_run() {
    let f = fixture(None, 4).await;
    let (run_id, payload) = dispatch_payload(&f, "nightly", Some("/tmp/jobs".into()));

    let receipt = f
        .relay
        .publish(
            subj("relay.system.pulse.sch-x"),
            payload,
            PublishOptions { from: "pulse".into(), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(receipt.delivered_to, 1);

    let pulse = f.pulse.clone();
    wait_for(move || {
        pulse.get_run(run_id).unwrap().map(|r| r.status) == Some(RunStatus::Completed)
    })
    .await;

    let run = f.pulse.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.output_summary.as_deref(), Some("hi"));
    assert!(run.finished_at.is_some());
    assert_eq!(run.session_id.as_deref(), Some(run_id.as_str()));

    // Span terminates processed.
    let store = f.relay.trace_store().clone();
    let id = receipt.message_id;
    wait_for(move || {
        store.get_span(id).unwrap().map(|s| s.status) == Some(SpanStatus::Processed)
    })
    .await;

    // The runtime saw the run id as session id and the payload cwd.
    let sent = f.runtime.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].session_id, run_id.as_str());
    assert_eq!(sent[0].cwd.as_deref(), Some(std::path::Path::new("/tmp/jobs")));
    let prompt = sent[0].system_prompt_append.as_deref().unwrap();
    assert!(prompt.contains("<relay_context>"));
    assert!(prompt.contains("Job: nightly"));
    assert!(prompt.contains("Run ID:"));
    assert!(prompt.contains("unattended"));
}

#[tokio::test]
async fn runtime_error_fails_the_run_and_span() {
    let f = fixture(None, 4).await;
    f.runtime.set_script(vec![
        StreamEvent::TextDelta { text: "partial".into() },
        StreamEvent::Error { message: "model exploded".into() },
    ]);
    let (run_id, payload) = dispatch_payload(&f, "nightly", None);

    let receipt = f
        .relay
        .publish(
            subj("relay.system.pulse.sch-x"),
            payload,
            PublishOptions { from: "pulse".into(), ..Default::default() },
        )
        .await
        .unwrap();

    let pulse = f.pulse.clone();
    wait_for(move || {
        pulse.get_run(run_id).unwrap().map(|r| r.status) == Some(RunStatus::Failed)
    })
    .await;
    let run = f.pulse.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.error.as_deref(), Some("model exploded"));
    assert_eq!(run.output_summary.as_deref(), Some("partial"));

    let store = f.relay.trace_store().clone();
    let id = receipt.message_id;
    wait_for(move || {
        store.get_span(id).unwrap().map(|s| s.status) == Some(SpanStatus::Failed)
    })
    .await;
}

#[tokio::test]
async fn expired_ttl_cancels_the_run_before_execution() {
    let f = fixture(None, 4).await;
    let (run_id, payload) = dispatch_payload(&f, "nightly", None);
    let now = f.clock.epoch_ms();

    // Hand-built envelope whose TTL is already behind the clock.
    let envelope = RelayEnvelope {
        id: dork_core::MessageId::new(),
        subject: subj("relay.system.pulse.sch-x"),
        from: "pulse".into(),
        reply_to: None,
        budget: Budget { ttl: now.saturating_sub(1), ..Budget::fresh_default(now) },
        created_at: now,
        payload,
    };
    let result = f
        .adapter
        .deliver(&envelope.subject.clone(), &envelope, None)
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("ttl_expired"));

    let run = f.pulse.get_run(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(f.runtime.sent_messages().is_empty(), "no stream was started");
}

#[tokio::test]
async fn agent_message_resolves_directory_through_mesh() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let agent_dir = root.join("a1");
    std::fs::create_dir_all(&agent_dir).unwrap();
    let mesh = Arc::new(MeshRegistry::new(root.join("data"), root.clone()));
    let manifest = mesh
        .register(&agent_dir, RegisterOverrides::default(), None, 0)
        .unwrap();

    let f = fixture(Some(Arc::clone(&mesh)), 4).await;
    f.runtime.set_script(vec![
        StreamEvent::TextDelta { text: "pong".into() },
        StreamEvent::Done {},
    ]);

    let subject = subj(&format!("relay.agent.{}", manifest.id));
    let receipt = f
        .relay
        .publish(
            subject,
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

    let runtime = Arc::clone(&f.runtime);
    wait_for(move || !runtime.sent_messages().is_empty()).await;
    let sent = f.runtime.sent_messages();
    assert_eq!(sent[0].session_id, manifest.id.as_str());
    assert_eq!(sent[0].cwd.as_deref(), Some(agent_dir.as_path()));
    assert_eq!(sent[0].content, "ping");

    // One response envelope per stream event, budget derived from the inbound.
    let store = f.relay.trace_store().clone();
    wait_for(move || {
        store
            .list_spans(&dork_store::SpanFilter {
                subject: Some("relay.human.console.c1".into()),
                ..Default::default()
            })
            .unwrap()
            .len()
            >= 2
    })
    .await;
    let replies = f
        .relay
        .trace_store()
        .list_spans(&dork_store::SpanFilter {
            subject: Some("relay.human.console.c1".into()),
            ..Default::default()
        })
        .unwrap();
    for reply in &replies {
        assert_eq!(reply.trace_id, receipt.message_id);
        assert_eq!(reply.budget_hops_used, 1);
    }

    // The inbound delivery ends processed.
    let store = f.relay.trace_store().clone();
    let id = receipt.message_id;
    wait_for(move || {
        store.get_span(id).unwrap().map(|s| s.status) == Some(SpanStatus::Processed)
    })
    .await;
}

#[tokio::test]
async fn capacity_gate_rejects_excess_deliveries() {
    let f = fixture(None, 2).await;
    // Slow stream keeps the first two deliveries occupied.
    f.runtime.set_event_delay(Duration::from_millis(50));
    let now = f.clock.epoch_ms();

    let envelope = |i: usize| RelayEnvelope {
        id: dork_core::MessageId::new(),
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
    let a1 = Arc::clone(&f.adapter);
    let a2 = Arc::clone(&f.adapter);
    let first = tokio::spawn(async move { a1.deliver(&e1.subject.clone(), &e1, None).await });
    let second = tokio::spawn(async move { a2.deliver(&e2.subject.clone(), &e2, None).await });

    let adapter = Arc::clone(&f.adapter);
    wait_for(move || adapter.status().active_count == 2).await;

    let third = f.adapter.deliver(&e3.subject.clone(), &e3, None).await;
    assert!(!third.success);
    assert_eq!(third.error.as_deref(), Some("adapter_at_capacity"));

    assert!(first.await.unwrap().success);
    assert!(second.await.unwrap().success);
    assert_eq!(f.adapter.status().active_count, 0);
}

#[tokio::test]
async fn custom_payload_is_forwarded_as_json() {
    let f = fixture(None, 4).await;
    let receipt = f
        .relay
        .publish(
            subj("relay.agent.sess-9"),
            Payload::Custom(serde_json::json!({"kind": "nudge", "urgency": "high"})),
            PublishOptions { from: "relay.system.ops".into(), ..Default::default() },
        )
        .await
        .unwrap();

    let runtime = Arc::clone(&f.runtime);
    wait_for(move || !runtime.sent_messages().is_empty()).await;
    let sent = f.runtime.sent_messages();
    assert_eq!(sent[0].session_id, "sess-9");
    assert!(sent[0].content.contains("nudge"));

    let store = f.relay.trace_store().clone();
    let id = receipt.message_id;
    wait_for(move || {
        store.get_span(id).unwrap().map(|s| s.status) == Some(SpanStatus::Processed)
    })
    .await;
}
