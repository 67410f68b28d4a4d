// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::epoch_ms;

fn request(id: &str, priority: Priority) -> Request {
    Request {
        id: id.to_owned(),
        origin: "test".to_owned(),
        payload: "payload".to_owned(),
        priority,
        scheduled_at: None,
        enqueued_at: epoch_ms(),
        attempts: 0,
        status: RequestStatus::Queued,
        metadata: None,
        timeout_ms: None,
        seq: 0,
    }
}

#[tokio::test]
async fn dequeues_in_strict_priority_order() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("low-1", Priority::Low), None).await.unwrap();
    mgr.enqueue(request("normal-1", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("urgent-1", Priority::Urgent), None).await.unwrap();
    mgr.enqueue(request("high-1", Priority::High), None).await.unwrap();

    assert_eq!(mgr.dequeue().await.unwrap().id, "urgent-1");
    assert_eq!(mgr.dequeue().await.unwrap().id, "high-1");
    assert_eq!(mgr.dequeue().await.unwrap().id, "normal-1");
    assert_eq!(mgr.dequeue().await.unwrap().id, "low-1");
    assert!(mgr.dequeue().await.is_none());
}

#[tokio::test]
async fn same_class_is_fifo() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("a", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("b", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("c", Priority::Normal), None).await.unwrap();

    assert_eq!(mgr.dequeue().await.unwrap().id, "a");
    assert_eq!(mgr.dequeue().await.unwrap().id, "b");
    assert_eq!(mgr.dequeue().await.unwrap().id, "c");
}

#[tokio::test]
async fn scheduled_request_promotes_once_due() {
    let mgr = QueueManager::new(100, None);
    let past = epoch_ms().saturating_sub(1000);
    mgr.enqueue(request("future", Priority::Urgent), Some(epoch_ms() + 60_000)).await.unwrap();
    mgr.enqueue(request("due", Priority::Urgent), Some(past)).await.unwrap();

    // The non-due entry stays scheduled; only the due one promotes.
    let next = mgr.dequeue().await.expect("due entry promoted");
    assert_eq!(next.id, "due");
    assert!(mgr.dequeue().await.is_none());

    let status = mgr.status().await;
    assert_eq!(status.scheduled.size, 1);
}

#[tokio::test]
async fn queue_full_rejects_enqueue() {
    let mgr = QueueManager::new(1, None);
    mgr.enqueue(request("a", Priority::Normal), None).await.unwrap();
    let err = mgr.enqueue(request("b", Priority::Normal), None).await.unwrap_err();
    assert_eq!(err, DispatchError::QueueFull);
}

#[tokio::test]
async fn pause_blocks_dequeue_until_resumed() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("a", Priority::Normal), None).await.unwrap();
    mgr.pause(Some("maintenance".to_owned())).await;

    assert!(mgr.dequeue().await.is_none());
    let status = mgr.status().await;
    assert!(status.paused);
    assert_eq!(status.pause_reason.as_deref(), Some("maintenance"));

    mgr.resume().await;
    assert_eq!(mgr.dequeue().await.unwrap().id, "a");
}

#[tokio::test]
async fn clear_removes_single_class_only() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("n1", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("h1", Priority::High), None).await.unwrap();

    let removed = mgr.clear(Some(Priority::Normal)).await;
    assert_eq!(removed, 1);

    assert_eq!(mgr.dequeue().await.unwrap().id, "h1");
    assert!(mgr.dequeue().await.is_none());
}

#[tokio::test]
async fn clear_all_empties_every_subqueue() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("n1", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("future", Priority::Low), Some(epoch_ms() + 60_000)).await.unwrap();

    let removed = mgr.clear(None).await;
    assert_eq!(removed, 2);
    assert_eq!(mgr.status().await.total, 0);
}

#[tokio::test]
async fn remove_deletes_from_priority_class() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("a", Priority::Normal), None).await.unwrap();
    mgr.enqueue(request("b", Priority::Normal), None).await.unwrap();

    assert!(mgr.remove("a").await);
    assert!(!mgr.remove("a").await);
    assert_eq!(mgr.dequeue().await.unwrap().id, "b");
}

#[tokio::test]
async fn remove_deletes_from_scheduled_subqueue() {
    let mgr = QueueManager::new(100, None);
    mgr.enqueue(request("future", Priority::Normal), Some(epoch_ms() + 60_000)).await.unwrap();
    assert!(mgr.remove("future").await);
    assert_eq!(mgr.status().await.scheduled.size, 0);
}

#[tokio::test]
async fn restore_reseeds_sequence_counter_past_prior_max() {
    let mgr = QueueManager::new(100, None);
    let mut snapshot = QueueSnapshot::default();
    let mut r = request("old", Priority::Normal);
    r.seq = 41;
    snapshot.normal.push(r);
    mgr.restore(snapshot).await;

    mgr.enqueue(request("new", Priority::Normal), None).await.unwrap();
    let snap = mgr.snapshot().await;
    assert!(snap.normal[1].seq > 41);
}
