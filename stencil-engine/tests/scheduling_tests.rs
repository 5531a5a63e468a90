//! Async generation through the engine: admission, ordering, dedup, batches.

mod common;

use std::sync::{Arc, Mutex};

use common::{bundle, fixture};
use futures::StreamExt;
use stencil_core::{ErrorKind, HookStage};
use stencil_engine::{EngineConfig, GenerationRequest, Hook, HookResult};
use tokio::sync::Semaphore;

fn three_templates(root: &std::path::Path) {
    for name in ["a", "b", "c"] {
        bundle(root, name, &format!("name: {name}\n"));
    }
}

fn capped(max_concurrent: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_generations: max_concurrent,
        ..EngineConfig::default()
    }
}

/// Pre-hook that waits for a permit from `gate` before generation starts.
fn gated(gate: &Arc<Semaphore>) -> Hook {
    let gate = Arc::clone(gate);
    Hook::callback("gate", HookStage::PreGen, move |_| {
        let gate = Arc::clone(&gate);
        async move {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return HookResult::failure(ErrorKind::Unknown, "gate closed"),
            }
            HookResult::ok()
        }
    })
}

/// Pre-hook that appends `label` to `log` when its generation starts.
fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Hook {
    let log = Arc::clone(log);
    let label = label.to_string();
    Hook::callback(format!("record-{label}"), HookStage::PreGen, move |_| {
        log.lock().unwrap().push(label.clone());
        async { HookResult::ok() }
    })
}

#[tokio::test]
async fn identical_requests_share_one_generation() {
    let fx = fixture(EngineConfig::default(), three_templates);
    let request = GenerationRequest::new("a", fx.out.path().join("a"));

    let first = fx.engine.generate_async(request.clone());
    let second = fx.engine.generate_async(request);
    assert_eq!(first.id(), second.id());

    let (r1, r2) = tokio::join!(first, second);
    assert!(r1.success, "{r1:?}");
    assert_eq!(r1, r2);

    let stats = fx.engine.stats().scheduler;
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.deduplicated, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn higher_priority_starts_first() {
    let fx = fixture(capped(1), three_templates);
    let gate = Arc::new(Semaphore::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    let blocker = fx.engine.generate_async(
        GenerationRequest::new("a", fx.out.path().join("blocker")).with_extra_hooks(vec![gated(&gate)]),
    );
    let mut handles = Vec::new();
    for (label, priority) in [("low", 1), ("high", 5), ("mid", 3), ("high2", 5)] {
        handles.push(fx.engine.generate_async(
            GenerationRequest::new("b", fx.out.path().join(label))
                .with_priority(priority)
                .with_extra_hooks(vec![recorder(&log, label)]),
        ));
    }
    assert_eq!(fx.engine.stats().scheduler.queued, 4);

    gate.add_permits(1);
    assert!(blocker.await.success);
    for handle in handles {
        assert!(handle.await.success);
    }

    assert_eq!(*log.lock().unwrap(), vec!["high", "high2", "mid", "low"]);
}

#[tokio::test]
async fn sixth_request_waits_for_a_permit() {
    let fx = fixture(capped(5), three_templates);
    let gate = Arc::new(Semaphore::new(0));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            fx.engine.generate_async(
                GenerationRequest::new("c", fx.out.path().join(format!("out{i}")))
                    .with_extra_hooks(vec![gated(&gate)]),
            )
        })
        .collect();

    let stats = fx.engine.stats().scheduler;
    assert_eq!((stats.running, stats.queued), (5, 1));

    gate.add_permits(6);
    let results = futures::future::join_all(handles).await;
    assert!(results.iter().all(|r| r.success));
    assert_eq!(fx.engine.stats().scheduler.running, 0);
}

#[tokio::test]
async fn cancel_pending_resolves_queued_requests() {
    let fx = fixture(capped(1), three_templates);
    let gate = Arc::new(Semaphore::new(0));

    let running = fx.engine.generate_async(
        GenerationRequest::new("a", fx.out.path().join("running")).with_extra_hooks(vec![gated(&gate)]),
    );
    let queued = fx.engine.generate_async(GenerationRequest::new("b", fx.out.path().join("queued")));

    assert_eq!(fx.engine.cancel_pending(), 1);
    let cancelled = queued.await;
    assert!(!cancelled.success);
    assert_eq!(cancelled.error_kind, Some(ErrorKind::Unknown));
    assert!(!fx.out.path().join("queued").exists());

    gate.add_permits(1);
    assert!(running.await.success);
}

#[tokio::test]
async fn batch_modes() {
    let fx = fixture(EngineConfig::default(), three_templates);
    let requests = |suffix: &str| {
        vec![
            GenerationRequest::new("a", fx.out.path().join(format!("a{suffix}"))),
            GenerationRequest::new("missing", fx.out.path().join(format!("m{suffix}"))),
            GenerationRequest::new("c", fx.out.path().join(format!("c{suffix}"))),
        ]
    };

    let partial = fx
        .engine
        .generate_batch(requests("1"), true)
        .await
        .expect("partial batch");
    let outcome: Vec<bool> = partial.iter().map(|r| r.success).collect();
    assert_eq!(outcome, vec![true, false, true]);
    assert_eq!(partial[1].error_kind, Some(ErrorKind::TemplateNotFound));

    let err = fx
        .engine
        .generate_batch(requests("2"), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

#[tokio::test]
async fn stream_yields_every_result() {
    let fx = fixture(EngineConfig::default(), three_templates);
    let requests = ["a", "b", "c"]
        .into_iter()
        .map(|name| GenerationRequest::new(name, fx.out.path().join(name)))
        .collect();

    let mut results: Vec<_> = fx.engine.generate_stream(requests, Some(2)).collect().await;
    results.sort_by(|x, y| x.template.cmp(&y.template));

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(results[0].template.as_str(), "a");
}
