//! Sync Coordinator tests against an in-process remote.

mod common;

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{at, row, rows, Harness};
use marksync_client::{ChangeSource, LocalStore, PassKind, RunOutcome, SyncEvent};
use marksync_engine::{epoch, MergeStrategy, PendingWindow};
use proptest::prelude::*;

fn completed(outcome: RunOutcome) -> marksync_client::PassReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected a completed pass, got {other:?}"),
    }
}

// ============================================================================
// Incremental Sync
// ============================================================================

#[tokio::test]
async fn test_mutation_is_pushed_and_watermark_covers_it() {
    let h = Harness::new(500).await;
    h.clock.set(at(2_000_000));
    let x1 = h.store.create("X1".into(), "x1.example".into()).await.unwrap();

    let report = completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

    assert_eq!(h.remote.pushes(), vec![vec![x1.clone()]]);
    assert_eq!(report.pushed, 1);
    assert_eq!(report.requests, 1);
    let state = h.store.sync_state().await.unwrap();
    assert!(state.last_synced_at >= x1.updated_at);

    // Nothing new: the next pass makes no requests.
    let report = completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
    assert_eq!(report.requests, 0);
    assert_eq!(h.remote.pushes().len(), 1);
}

#[tokio::test]
async fn test_push_requests_are_ceil_of_rows_over_batch() {
    for (n, expected) in [(1usize, 1usize), (499, 1), (500, 1), (501, 2), (1000, 2), (1201, 3)] {
        let h = Harness::new(500).await;
        for i in 0..n {
            // Many rows share a timestamp; the id breaks ties.
            h.clock.set(at(2_000_000 + (i / 7) as i64));
            h.store
                .create(format!("row {i}"), "r.example".into())
                .await
                .unwrap();
        }

        let report = completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
        let pushes = h.remote.pushes();

        assert_eq!(pushes.len(), expected, "n = {n}");
        assert_eq!(report.pushed, n);

        let mut ids = h.remote.pushed_ids();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total, "duplicate rows pushed for n = {n}");
        assert_eq!(h.remote.server_count(), n);
    }
}

#[tokio::test]
async fn test_failed_push_keeps_watermark() {
    let h = Harness::new(2).await;
    h.clock.set(at(2_000_000));
    for i in 0..5 {
        h.store
            .create(format!("row {i}"), "r.example".into())
            .await
            .unwrap();
    }

    h.remote.fail_push_at(1);
    let err = h.coordinator.run(PassKind::Incremental).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.store.sync_state().await.unwrap().last_synced_at, epoch());

    // The retry pushes everything again, including the batch that went through.
    let report = completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
    assert_eq!(report.pushed, 5);
    assert_eq!(h.remote.server_count(), 5);
    assert!(h.store.sync_state().await.unwrap().last_synced_at >= at(2_000_000));
}

#[tokio::test]
async fn test_mutation_during_pass_is_pushed_next_time() {
    let h = Harness::new(500).await;
    h.clock.set(at(2_000_000));
    h.store.create("first".into(), "a.example".into()).await.unwrap();

    let release = h.remote.hold_next_push();
    let coordinator = h.coordinator.clone();
    let pass = tokio::spawn(async move { coordinator.run(PassKind::Incremental).await });
    h.remote.push_entered.notified().await;

    // Committed while the first batch is on the wire.
    let late = h.store.create("late".into(), "b.example".into()).await.unwrap();
    release.send(()).unwrap();

    completed(pass.await.unwrap().unwrap());
    assert!(h.store.sync_state().await.unwrap().last_synced_at < late.updated_at);

    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
    assert!(h.remote.pushed_ids().contains(&late.id));
}

#[tokio::test]
async fn test_mutation_in_the_watermark_instant_is_pushed() {
    let h = Harness::new(500).await;
    h.clock.set(at(2_000_000));
    let a = h.store.create("a".into(), "a.example".into()).await.unwrap();
    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
    let watermark = h.store.sync_state().await.unwrap().last_synced_at;

    // The clock has not moved since the watermark was written.
    let b = h.store.create("b".into(), "b.example".into()).await.unwrap();
    assert!(b.updated_at > watermark);

    h.clock.advance(ChronoDuration::seconds(100));
    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());
    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

    assert!(h.remote.pushed_ids().contains(&b.id));
    assert_eq!(h.remote.server_row(&b.id), Some(b));
    assert_eq!(h.remote.server_row(&a.id), Some(a));
}

#[tokio::test]
async fn test_edit_after_sync_is_pushed() {
    let h = Harness::new(500).await;
    h.clock.set(at(2_000_000));
    let row = h.store.create("a".into(), "a.example".into()).await.unwrap();
    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

    let edited = h
        .store
        .edit(&row.id, "a2".into(), "a.example".into())
        .await
        .unwrap();
    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

    assert_eq!(h.remote.server_row(&row.id), Some(edited));
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_bootstrap_follows_cursor_to_the_end() {
    let h = Harness::new(500).await;
    h.remote.seed(rows(800, 1000));

    let report = completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());

    assert_eq!(report.requests, 2);
    assert_eq!(report.pulled, 800);
    assert_eq!(h.store.count().await.unwrap(), 800);

    let queries = h.remote.queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].cursor(), None);
    assert!(queries[1].cursor().is_some());
    assert!(queries.iter().all(|q| q.from == epoch() && q.limit == 500));

    // A fresh device has nothing to push.
    assert!(h.remote.pushes().is_empty());
    assert_eq!(
        h.store.sync_state().await.unwrap().last_synced_at,
        at(1_000_000)
    );
}

#[tokio::test]
async fn test_bootstrap_empty_remote_still_sets_watermark() {
    let h = Harness::new(500).await;

    let report = completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());

    assert_eq!(report.requests, 1);
    assert_eq!(report.pulled, 0);
    assert_eq!(report.watermark, Some(at(1_000_000)));
}

#[tokio::test]
async fn test_interrupted_bootstrap_converges_on_retry() {
    let h = Harness::new(500).await;
    h.remote.seed(rows(800, 1000));

    h.remote.fail_bootstrap_at(1);
    assert!(h.coordinator.run(PassKind::Bootstrap).await.is_err());
    assert_eq!(h.store.count().await.unwrap(), 500);
    assert_eq!(h.store.sync_state().await.unwrap().last_synced_at, epoch());

    completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());
    assert_eq!(h.store.count().await.unwrap(), 800);

    // The retry pulled the same window again, so the first page was applied twice.
    for original in rows(800, 1000) {
        assert_eq!(h.store.get(&original.id).await.unwrap(), Some(original));
    }
}

#[tokio::test]
async fn test_resuming_bootstrap_pushes_local_window() {
    let h = Harness::new(500).await;
    let t0 = at(1_000_000);
    h.store.set_last_synced_at(t0).await.unwrap();

    // Changed remotely and locally since the last sync.
    h.remote.seed([row("R1", "remote", 1_000_500)]);
    h.clock.set(at(1_000_600));
    let local = h.store.create("local".into(), "l.example".into()).await.unwrap();
    h.clock.set(at(1_000_700));

    let report = completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());

    assert_eq!(report.pulled, 1);
    assert_eq!(h.remote.queries()[0].from, t0);
    // The pulled row sits inside the window too and is echoed back.
    assert_eq!(h.remote.pushed_ids(), vec!["R1".to_string(), local.id.clone()]);
    assert!(h.store.get("R1").await.unwrap().is_some());
    assert_eq!(
        h.store.sync_state().await.unwrap().last_synced_at,
        at(1_000_700)
    );
}

#[tokio::test]
async fn test_bootstrap_remote_row_overwrites_local() {
    let h = Harness::new(500).await;
    h.store
        .upsert(&row("X1", "local", 2_000), MergeStrategy::RemoteAuthoritative)
        .await
        .unwrap();
    // Older than the local copy, but remote is authoritative.
    h.remote.seed([row("X1", "remote", 1_500)]);

    completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());

    assert_eq!(h.store.get("X1").await.unwrap().unwrap().title, "remote");
}

#[tokio::test]
async fn test_bootstrap_notifies_observers() {
    let h = Harness::new(500).await;
    let mut subscription = h.notifier.subscribe();
    h.remote.seed(rows(3, 1000));

    completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());

    assert_eq!(
        subscription.events.try_recv().unwrap(),
        SyncEvent::StateChanged {
            source: ChangeSource::Bootstrap
        }
    );

    // Nothing new: no event.
    completed(h.coordinator.run(PassKind::Bootstrap).await.unwrap());
    assert!(subscription.events.try_recv().is_err());
}

// ============================================================================
// Single Flight
// ============================================================================

#[tokio::test]
async fn test_disabled_sync_makes_no_requests() {
    let h = Harness::new(500).await;
    h.store.set_sync_enabled(false).await.unwrap();
    h.store.create("x".into(), "x.example".into()).await.unwrap();

    for kind in [PassKind::Bootstrap, PassKind::Incremental] {
        assert_eq!(h.coordinator.run(kind).await.unwrap(), RunOutcome::Disabled);
    }
    assert!(h.remote.queries().is_empty());
    assert!(h.remote.pushes().is_empty());
}

#[tokio::test]
async fn test_overlapping_triggers_coalesce_into_one_follow_up() {
    let h = Harness::new(500).await;
    h.store.create("x".into(), "x.example".into()).await.unwrap();

    let release = h.remote.hold_next_push();
    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.run(PassKind::Incremental).await });
    h.remote.push_entered.notified().await;
    assert!(h.coordinator.is_running());

    assert_eq!(
        h.coordinator.run(PassKind::Incremental).await.unwrap(),
        RunOutcome::Coalesced
    );
    assert_eq!(
        h.coordinator.run(PassKind::Bootstrap).await.unwrap(),
        RunOutcome::Coalesced
    );
    assert_eq!(
        h.coordinator.run(PassKind::Incremental).await.unwrap(),
        RunOutcome::Coalesced
    );

    release.send(()).unwrap();
    let report = completed(first.await.unwrap().unwrap());

    // One push from the first pass, one bootstrap page from the follow-up.
    assert_eq!(h.remote.pushes().len(), 1);
    assert_eq!(h.remote.queries().len(), 1);
    assert_eq!(report.requests, 2);
    assert!(!h.coordinator.is_running());
}

#[tokio::test]
async fn test_wait_idle_covers_follow_up() {
    let h = Harness::new(500).await;
    h.store.create("x".into(), "x.example".into()).await.unwrap();

    // Nothing in flight: returns at once.
    tokio::time::timeout(Duration::from_secs(5), h.coordinator.wait_idle())
        .await
        .unwrap();

    let release = h.remote.hold_next_push();
    let coordinator = h.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.run(PassKind::Incremental).await });
    h.remote.push_entered.notified().await;
    assert_eq!(
        h.coordinator.run(PassKind::Bootstrap).await.unwrap(),
        RunOutcome::Coalesced
    );

    let coordinator = h.coordinator.clone();
    let waiter = tokio::spawn(async move { coordinator.wait_idle().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    release.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(!h.coordinator.is_running());
    assert_eq!(h.remote.queries().len(), 1);
    completed(first.await.unwrap().unwrap());
}

#[tokio::test]
async fn test_failed_pass_releases_guard() {
    let h = Harness::new(500).await;
    h.remote.fail_bootstrap_at(0);

    assert!(h.coordinator.run(PassKind::Bootstrap).await.is_err());
    assert!(!h.coordinator.is_running());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.coordinator.run(PassKind::Bootstrap),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
}

#[tokio::test]
async fn test_watermark_never_moves_backwards() {
    let h = Harness::new(500).await;
    h.store.set_last_synced_at(at(3_000_000)).await.unwrap();
    h.clock.advance(ChronoDuration::seconds(-10));

    completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

    assert_eq!(
        h.store.sync_state().await.unwrap().last_synced_at,
        at(3_000_000)
    );
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Create,
    Advance(i64),
    Incremental,
    Bootstrap,
    FailNextPush,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Create),
        2 => (-20i64..200).prop_map(Step::Advance),
        2 => Just(Step::Incremental),
        1 => Just(Step::Bootstrap),
        1 => Just(Step::FailNextPush),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_watermark_is_monotonic_and_every_write_reaches_the_remote(
        steps in prop::collection::vec(step(), 1..40),
        batch in 1usize..4,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let h = Harness::new(batch).await;
            let mut last = h.store.sync_state().await.unwrap().last_synced_at;

            for step in steps {
                match step {
                    Step::Create => {
                        h.store.create("t".into(), "u.example".into()).await.unwrap();
                    }
                    Step::Advance(ms) => h.clock.advance(ChronoDuration::milliseconds(ms)),
                    Step::Incremental => {
                        let _ = h.coordinator.run(PassKind::Incremental).await;
                    }
                    Step::Bootstrap => {
                        let _ = h.coordinator.run(PassKind::Bootstrap).await;
                    }
                    Step::FailNextPush => h.remote.fail_push_at(0),
                }

                let now = h.store.sync_state().await.unwrap().last_synced_at;
                assert!(now >= last, "watermark moved back from {last} to {now}");
                last = now;
            }

            // A pending injected failure is used up by at most one pass.
            h.clock.advance(ChronoDuration::seconds(1));
            let _ = h.coordinator.run(PassKind::Incremental).await;
            completed(h.coordinator.run(PassKind::Incremental).await.unwrap());

            let local = h
                .store
                .pending(PendingWindow::after(epoch()), None, usize::MAX)
                .await
                .unwrap();
            for row in local {
                assert_eq!(h.remote.server_row(&row.id), Some(row));
            }
        });
    }
}
