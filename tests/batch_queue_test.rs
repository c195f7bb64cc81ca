mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use common::{batch_config, RecordingStatus, ScriptedFiller, ScriptedSubmitter};
use question_region_scan::events::BatchEvent;
use question_region_scan::models::{
    GroupId, GroupStatus, NewGroup, NormalizedBox, Region, TAG_AI, TAG_MANUAL,
};
use question_region_scan::orchestrator::{BatchQueue, UiLock};
use question_region_scan::store::RegionStore;
use question_region_scan::AppError;

struct Harness {
    store: RegionStore,
    ui_lock: UiLock,
    status: Arc<RecordingStatus>,
    queue: Arc<BatchQueue>,
}

fn harness(store: RegionStore, submitter: ScriptedSubmitter, filler: ScriptedFiller) -> Harness {
    let ui_lock = UiLock::new();
    ui_lock.acquire();
    let status = Arc::new(RecordingStatus::default());
    let queue = Arc::new(BatchQueue::new(
        store.clone(),
        Arc::new(submitter),
        Arc::new(filler),
        status.clone(),
        batch_config(),
        ui_lock.clone(),
    ));
    Harness {
        store,
        ui_lock,
        status,
        queue,
    }
}

fn add_group(store: &RegionStore, tag: &str, status: GroupStatus) -> GroupId {
    let id = store.create_group(NewGroup::default().with_tag(tag).with_status(status));
    store.append_region(
        Some(id),
        Region::new(1, NormalizedBox::from_raw([100, 100, 300, 900]), 1000, 1400),
    );
    id
}

fn machine_groups(n: usize) -> (RegionStore, Vec<GroupId>) {
    let store = RegionStore::new();
    let ids = (0..n)
        .map(|_| add_group(&store, TAG_AI, GroupStatus::Verified))
        .collect();
    (store, ids)
}

fn collect(rx: &mut broadcast::Receiver<BatchEvent>) -> Vec<BatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ready_order(events: &[BatchEvent]) -> Vec<GroupId> {
    events
        .iter()
        .filter_map(|e| match e {
            BatchEvent::GroupReady { group_id, .. } => Some(*group_id),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_process_finishes_immediately() {
    let store = RegionStore::new();
    add_group(&store, TAG_MANUAL, GroupStatus::Verified);
    add_group(&store, TAG_AI, GroupStatus::Ready);
    let h = harness(store, ScriptedSubmitter::new(), ScriptedFiller::new());
    let mut rx = h.queue.subscribe();

    let report = assert_ok!(h.queue.start().await);

    assert_eq!((report.processed, report.total), (0, 0));
    assert_eq!(
        collect(&mut rx),
        vec![
            BatchEvent::NothingToProcess,
            BatchEvent::BatchFinished {
                processed_count: 0,
                total_count: 0
            }
        ]
    );
    assert!(!h.ui_lock.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_draft_groups_are_not_snapshotted() {
    let store = RegionStore::new();
    let draft = add_group(&store, TAG_AI, GroupStatus::Draft);
    let verified = add_group(&store, TAG_AI, GroupStatus::Verified);
    let h = harness(store, ScriptedSubmitter::new(), ScriptedFiller::new());

    let report = assert_ok!(h.queue.start().await);

    assert_eq!((report.processed, report.total), (1, 1));
    assert_eq!(report.order, vec![verified]);
    assert_eq!(h.store.get(draft).unwrap().status, GroupStatus::Draft);
    assert_eq!(h.store.get(verified).unwrap().status, GroupStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_groups_are_processed_in_snapshot_order() {
    let (store, ids) = machine_groups(3);
    let submitter = ScriptedSubmitter::new()
        .with_slots("第1题", &["1"])
        .with_slots("第2题", &["1"]);
    // 第一个组最慢，第三个组没有补图位
    let filler = ScriptedFiller::new()
        .fills("g1", &[(3_000, "1")])
        .fills("g2", &[(100, "1")]);
    let h = harness(store, submitter, filler);
    let mut rx = h.queue.subscribe();

    let report = assert_ok!(h.queue.start().await);

    assert_eq!(report.order, ids);
    assert_eq!((report.processed, report.total), (3, 3));
    assert_eq!(ready_order(&collect(&mut rx)), ids);
    assert!(h
        .store
        .groups()
        .iter()
        .all(|g| g.status == GroupStatus::Ready));
    assert!(!h.ui_lock.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_filled_slots_advance_before_grace_period() {
    let (store, ids) = machine_groups(1);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1", "2"]);
    let filler = ScriptedFiller::new().fills("g1", &[(200, "slot-1"), (300, "2")]);
    let h = harness(store, submitter, filler);

    let started = Instant::now();
    let report = assert_ok!(h.queue.start().await);

    assert_eq!(started.elapsed(), Duration::from_millis(300));
    assert_eq!(report.order, ids);
    assert_eq!(h.store.get(ids[0]).unwrap().status, GroupStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_unfilled_slot_times_out_after_grace_plus_ceiling() {
    let (store, ids) = machine_groups(2);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1"]);
    let h = harness(store, submitter, ScriptedFiller::new());
    let mut rx = h.queue.subscribe();

    let started = Instant::now();
    let report = assert_ok!(h.queue.start().await);

    assert_eq!(started.elapsed(), Duration::from_secs(125));
    assert_eq!(report.order, ids);
    assert_eq!(ready_order(&collect(&mut rx)), ids);
    assert_eq!(h.store.get(ids[0]).unwrap().status, GroupStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_slot_filled_before_declaration_is_remembered() {
    let (store, _) = machine_groups(1);
    let submitter = ScriptedSubmitter::new()
        .with_slots("第1题", &["slot-1"])
        .with_delay(Duration::from_secs(2));
    let filler = ScriptedFiller::new().fills("g1", &[(100, "1")]);
    let h = harness(store, submitter, filler);

    let started = Instant::now();
    let report = assert_ok!(h.queue.start().await);

    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(report.processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fill_from_previous_group_does_not_count_for_next() {
    let (store, ids) = machine_groups(2);
    // 第一个组没有补图位，它的补图任务在 1s 后才报告 "1"
    let submitter = ScriptedSubmitter::new().with_slots("第2题", &["1"]);
    let filler = ScriptedFiller::new().fills("g1", &[(1_000, "1")]);
    let h = harness(store, submitter, filler);

    let started = Instant::now();
    let report = assert_ok!(h.queue.start().await);

    assert_eq!(report.order, ids);
    assert_eq!(started.elapsed(), Duration::from_secs(125));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_group_is_skipped_without_error() {
    let (store, ids) = machine_groups(2);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1"]);
    let filler = ScriptedFiller::new().fills("g1", &[(1_000, "1")]);
    let h = harness(store, submitter, filler);

    let queue = h.queue.clone();
    let run = tokio::spawn(async move { queue.start().await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(h.store.remove_group(ids[1]));

    let report = assert_ok!(run.await.unwrap());
    assert_eq!(report.total, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.order, vec![ids[0]]);
    assert!(!h.status.contains("处理失败"));
}

#[tokio::test(start_paused = true)]
async fn test_failing_group_counts_as_processed_and_queue_continues() {
    let (store, ids) = machine_groups(2);
    let submitter = ScriptedSubmitter::new().failing("第1题");
    let h = harness(store, submitter, ScriptedFiller::new());

    let started = Instant::now();
    let report = assert_ok!(h.queue.start().await);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.processed, 2);
    assert_eq!(report.order, ids);
    assert_eq!(h.store.get(ids[0]).unwrap().status, GroupStatus::Verified);
    assert_eq!(h.store.get(ids[1]).unwrap().status, GroupStatus::Ready);
    assert!(h.status.contains("处理失败"));
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_refused_while_running() {
    let (store, _) = machine_groups(1);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1"]);
    let h = harness(store, submitter, ScriptedFiller::new());

    let queue = h.queue.clone();
    let run = tokio::spawn(async move { queue.start().await });
    while !h.queue.is_running() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let err = assert_err!(h.queue.start().await);
    assert!(matches!(err, AppError::BatchBusy));
    assert!(h.queue.current_job().is_some());

    h.queue.stop();
    let report = assert_ok!(run.await.unwrap());
    assert!(report.stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_wait_and_leaves_group_unmarked() {
    let (store, ids) = machine_groups(2);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1"]);
    let h = harness(store, submitter, ScriptedFiller::new());
    let mut rx = h.queue.subscribe();

    let queue = h.queue.clone();
    let run = tokio::spawn(async move { queue.start().await });
    tokio::time::sleep(Duration::from_secs(10)).await;

    let job = h.queue.current_job().unwrap();
    assert_eq!(job.group_id, ids[0]);
    assert_eq!(job.pending_slots.len(), 1);

    h.queue.stop();
    let report = assert_ok!(run.await.unwrap());

    assert!(report.stopped);
    assert_eq!(report.processed, 0);
    assert_eq!(h.store.get(ids[0]).unwrap().status, GroupStatus::Verified);
    assert!(collect(&mut rx).contains(&BatchEvent::BatchFinished {
        processed_count: 0,
        total_count: 2
    }));
    assert!(!h.ui_lock.is_locked());
    assert!(h.queue.current_job().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pause_shifts_the_deadline() {
    let (store, _) = machine_groups(1);
    let submitter = ScriptedSubmitter::new().with_slots("第1题", &["1"]);
    let h = harness(store, submitter, ScriptedFiller::new());

    let started = Instant::now();
    let queue = h.queue.clone();
    let run = tokio::spawn(async move { queue.start().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.queue.pause();
    tokio::time::sleep(Duration::from_secs(29)).await;
    h.queue.resume();

    let report = assert_ok!(run.await.unwrap());
    assert_eq!(report.processed, 1);
    // 第一个检查点在 5s，暂停到 30s，截止时间顺延 25s
    assert_eq!(started.elapsed(), Duration::from_secs(150));
}

#[tokio::test(start_paused = true)]
async fn test_fill_request_targets_group_bounds() {
    let (store, ids) = machine_groups(1);
    let filler = Arc::new(ScriptedFiller::new());
    let ui_lock = UiLock::new();
    let queue = BatchQueue::new(
        store,
        Arc::new(ScriptedSubmitter::new().with_delay(Duration::from_millis(1))),
        filler.clone(),
        Arc::new(RecordingStatus::default()),
        batch_config(),
        ui_lock,
    );

    assert_ok!(queue.start().await);

    let requests = filler.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].group_id, ids[0]);
    assert_eq!(requests[0].page, 1);
    assert_eq!(requests[0].bounds.to_raw(), [100, 100, 300, 900]);
}
