// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Five-class priority queue plus a scheduled sub-queue, with durable snapshots.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::model::{epoch_ms, Priority, Request, RequestStatus};

/// Entry in the scheduled sub-queue, ordered by `scheduled_at` (earliest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduledEntry {
    scheduled_at: u64,
    request: Request,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_at == other.scheduled_at
    }
}
impl Eq for ScheduledEntry {}
impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; wrap in Reverse at the call site for min-heap order.
        self.scheduled_at.cmp(&other.scheduled_at)
    }
}

/// Durable snapshot of queue contents and pause state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub urgent: Vec<Request>,
    pub high: Vec<Request>,
    pub normal: Vec<Request>,
    pub low: Vec<Request>,
    pub scheduled: Vec<Request>,
    pub paused: bool,
    pub pause_reason: Option<String>,
}

/// Per-class queue sizes and oldest-enqueued-at, for the `status()` view.
#[derive(Debug, Clone, Serialize)]
pub struct ClassStatus {
    pub size: usize,
    pub oldest_enqueued_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub urgent: ClassStatus,
    pub high: ClassStatus,
    pub normal: ClassStatus,
    pub low: ClassStatus,
    pub scheduled: ClassStatus,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub total: usize,
}

struct Inner {
    classes: [VecDeque<Request>; 4],
    scheduled: BinaryHeap<Reverse<ScheduledEntry>>,
    paused: bool,
    pause_reason: Option<String>,
}

impl Inner {
    fn class(&mut self, priority: Priority) -> &mut VecDeque<Request> {
        &mut self.classes[class_index(priority)]
    }

    fn total(&self) -> usize {
        self.classes.iter().map(VecDeque::len).sum::<usize>() + self.scheduled.len()
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            urgent: self.classes[class_index(Priority::Urgent)].iter().cloned().collect(),
            high: self.classes[class_index(Priority::High)].iter().cloned().collect(),
            normal: self.classes[class_index(Priority::Normal)].iter().cloned().collect(),
            low: self.classes[class_index(Priority::Low)].iter().cloned().collect(),
            scheduled: self.scheduled.iter().map(|Reverse(e)| e.request.clone()).collect(),
            paused: self.paused,
            pause_reason: self.pause_reason.clone(),
        }
    }
}

fn class_index(priority: Priority) -> usize {
    match priority {
        Priority::Urgent => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// The five-class priority queue manager.
pub struct QueueManager {
    inner: Mutex<Inner>,
    max_size: usize,
    snapshot_path: Option<PathBuf>,
    seq: AtomicU64,
}

impl QueueManager {
    pub fn new(max_size: usize, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                classes: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
                scheduled: BinaryHeap::new(),
                paused: false,
                pause_reason: None,
            }),
            max_size,
            snapshot_path,
            seq: AtomicU64::new(0),
        }
    }

    /// Restore a previously-persisted snapshot, e.g. on startup.
    pub async fn restore(&self, snapshot: QueueSnapshot) {
        let mut inner = self.inner.lock().await;
        inner.classes[class_index(Priority::Urgent)] = snapshot.urgent.into();
        inner.classes[class_index(Priority::High)] = snapshot.high.into();
        inner.classes[class_index(Priority::Normal)] = snapshot.normal.into();
        inner.classes[class_index(Priority::Low)] = snapshot.low.into();
        inner.scheduled = snapshot
            .scheduled
            .into_iter()
            .map(|r| {
                Reverse(ScheduledEntry { scheduled_at: r.scheduled_at.unwrap_or(0), request: r })
            })
            .collect();
        inner.paused = snapshot.paused;
        inner.pause_reason = snapshot.pause_reason;

        let max_seq = inner
            .classes
            .iter()
            .flatten()
            .chain(inner.scheduled.iter().map(|Reverse(e)| &e.request))
            .map(|r| r.seq)
            .max()
            .unwrap_or(0);
        self.seq.store(max_seq + 1, Ordering::Relaxed);
    }

    /// Enqueue a freshly-accepted or retried request.
    pub async fn enqueue(
        &self,
        mut request: Request,
        scheduled_at: Option<u64>,
    ) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock().await;
        if inner.total() >= self.max_size {
            return Err(DispatchError::QueueFull);
        }

        request.seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = epoch_ms();

        match scheduled_at {
            Some(at) if at > now => {
                request.status = RequestStatus::Scheduled;
                request.scheduled_at = Some(at);
                inner.scheduled.push(Reverse(ScheduledEntry { scheduled_at: at, request }));
            }
            _ => {
                request.status = RequestStatus::Queued;
                inner.class(request.priority).push_back(request);
            }
        }

        self.persist(&inner).await;
        Ok(())
    }

    /// Promote any scheduled entries whose time has come, then return the next
    /// eligible request in `urgent -> high -> normal -> low` order.
    pub async fn dequeue(&self) -> Option<Request> {
        let mut inner = self.inner.lock().await;
        if inner.paused {
            return None;
        }

        self.promote_due(&mut inner);

        for priority in Priority::ORDER {
            if let Some(mut request) = inner.class(priority).pop_front() {
                request.status = RequestStatus::Running;
                self.persist(&inner).await;
                return Some(request);
            }
        }
        None
    }

    /// Run only the scheduled -> priority promotion sweep (used by the periodic
    /// scheduler tick so promotion isn't solely gated on a `dequeue()` call).
    pub async fn promote_scheduled(&self) {
        let mut inner = self.inner.lock().await;
        let promoted = self.promote_due(&mut inner);
        if promoted {
            self.persist(&inner).await;
        }
    }

    fn promote_due(&self, inner: &mut Inner) -> bool {
        let now = epoch_ms();
        let mut promoted = false;
        while let Some(Reverse(entry)) = inner.scheduled.pop() {
            if entry.scheduled_at > now {
                inner.scheduled.push(Reverse(entry));
                break;
            }
            let mut request = entry.request;
            request.status = RequestStatus::Queued;
            inner.class(request.priority).push_back(request);
            promoted = true;
        }
        promoted
    }

    pub async fn pause(&self, reason: Option<String>) {
        let mut inner = self.inner.lock().await;
        inner.paused = true;
        inner.pause_reason = reason;
        self.persist(&inner).await;
    }

    pub async fn resume(&self) {
        let mut inner = self.inner.lock().await;
        inner.paused = false;
        inner.pause_reason = None;
        self.persist(&inner).await;
    }

    /// Clear one priority class, or all classes (and the scheduled sub-queue)
    /// when `priority` is `None`. Returns the number of requests removed.
    pub async fn clear(&self, priority: Option<Priority>) -> usize {
        let mut inner = self.inner.lock().await;
        let removed = match priority {
            Some(p) => {
                let class = inner.class(p);
                let n = class.len();
                class.clear();
                n
            }
            None => {
                let mut n = inner.scheduled.len();
                inner.scheduled.clear();
                for class in &mut inner.classes {
                    n += class.len();
                    class.clear();
                }
                n
            }
        };
        self.persist(&inner).await;
        removed
    }

    /// Remove a single request by id from any sub-queue. Returns whether found.
    pub async fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let mut found = false;
        for class in &mut inner.classes {
            if let Some(pos) = class.iter().position(|r| r.id == id) {
                class.remove(pos);
                found = true;
                break;
            }
        }
        if !found {
            let remaining: Vec<_> =
                inner.scheduled.drain().filter(|Reverse(e)| {
                    if e.request.id == id {
                        found = true;
                        false
                    } else {
                        true
                    }
                }).collect();
            inner.scheduled = remaining.into_iter().collect();
        }
        if found {
            self.persist(&inner).await;
        }
        found
    }

    pub async fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().await;
        let class_status = |priority: Priority| {
            let class = &inner.classes[class_index(priority)];
            ClassStatus { size: class.len(), oldest_enqueued_at: class.front().map(|r| r.enqueued_at) }
        };
        QueueStatus {
            urgent: class_status(Priority::Urgent),
            high: class_status(Priority::High),
            normal: class_status(Priority::Normal),
            low: class_status(Priority::Low),
            scheduled: ClassStatus {
                size: inner.scheduled.len(),
                oldest_enqueued_at: inner
                    .scheduled
                    .iter()
                    .map(|Reverse(e)| e.request.enqueued_at)
                    .min(),
            },
            paused: inner.paused,
            pause_reason: inner.pause_reason.clone(),
            total: inner.total(),
        }
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.inner.lock().await.snapshot()
    }

    async fn persist(&self, inner: &Inner) {
        let Some(ref path) = self.snapshot_path else { return };
        let snapshot = inner.snapshot();
        if let Err(e) = crate::persist::save(path, &snapshot) {
            tracing::warn!(err = %e, "failed to persist queue snapshot");
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
