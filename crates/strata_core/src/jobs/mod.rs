// =============================================================================
// JOBS - Dependency-inferred parallel job scheduler
// =============================================================================
// Job groups live in a fixed ring of 256 slots. Starting a group claims
// the next slot, bumps the slot's epoch (so a stale group id can never
// alias a new group in the same slot) and infers at most one dependency:
// the nearest older outstanding group whose declared component access
// collides with the new group's. Because every group waits on the nearest
// collision and groups are started in submission order, transitive
// conflicts resolve through the chain.
//
// Workers and the participating caller both pull jobs with try_run_one,
// which only claims jobs from groups whose dependency is satisfied. A
// dependency counts as satisfied once the depended-on group has no
// unfinished jobs, or once its slot was reused for a newer epoch.
//
// A panicking job is caught at the worker boundary, logged and counted;
// its group completes as if the job had finished. A frame must never
// hang on one bad job.
// =============================================================================

//! Job groups, dependency inference and the worker pool.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::ecs::query::ComponentQuery;

/// Number of slots in the job group ring.
pub const RING_SLOTS: usize = 256;

/// A queued unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a started job group: slot index plus the slot epoch at the
/// time the group was started. Stale handles are detected, not misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobGroupId {
    slot: u8,
    epoch: u64,
}

impl JobGroupId {
    /// Ring slot this group occupies.
    #[must_use]
    pub fn slot(self) -> u8 {
        self.slot
    }

    /// Slot epoch at group start.
    #[must_use]
    pub fn epoch(self) -> u64 {
        self.epoch
    }
}

#[derive(Default)]
struct GroupSlot {
    query: Mutex<ComponentQuery>,
    epoch: AtomicU64,
    /// Nearest older colliding group, as (slot index, epoch then).
    dependency: Mutex<Option<(usize, u64)>>,
    /// Jobs queued but not yet finished.
    total: AtomicUsize,
    /// Jobs queued but not yet claimed by a runner.
    grab: AtomicUsize,
    queue: Mutex<VecDeque<Job>>,
}

struct SchedulerShared {
    slots: Vec<GroupSlot>,
    /// Unfinished jobs across all groups.
    outstanding: AtomicUsize,
    /// Jobs that panicked since construction.
    failed: AtomicUsize,
    /// Rotating start slot for job scans, shared by every runner.
    scan: AtomicUsize,
    shutdown: AtomicBool,
    sleep: Mutex<()>,
    wake: Condvar,
}

impl SchedulerShared {
    fn dependency_satisfied(&self, slot: &GroupSlot) -> bool {
        match *slot.dependency.lock() {
            None => true,
            Some((dep_index, dep_epoch)) => {
                let dep = &self.slots[dep_index];
                dep.epoch.load(Ordering::Acquire) != dep_epoch
                    || dep.total.load(Ordering::Acquire) == 0
            }
        }
    }

    /// Claims and runs one ready job. Returns `false` if nothing was
    /// ready to claim. The scan starts one slot further each call so no
    /// slot is structurally favored.
    fn try_run_one(&self) -> bool {
        let start = self.scan.fetch_add(1, Ordering::Relaxed) % RING_SLOTS;
        for offset in 0..RING_SLOTS {
            let slot = &self.slots[(start + offset) % RING_SLOTS];
            if slot.grab.load(Ordering::Acquire) == 0 {
                continue;
            }
            if !self.dependency_satisfied(slot) {
                continue;
            }
            let job = {
                let mut queue = slot.queue.lock();
                match queue.pop_front() {
                    Some(job) => {
                        slot.grab.fetch_sub(1, Ordering::AcqRel);
                        job
                    }
                    None => continue,
                }
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                let reason = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string panic payload");
                tracing::error!(reason, "job panicked; its group completes without it");
                self.failed.fetch_add(1, Ordering::AcqRel);
            }

            slot.total.fetch_sub(1, Ordering::AcqRel);
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            // A finished job may unblock dependent groups and waiters.
            self.wake.notify_all();
            return true;
        }
        false
    }
}

fn worker_loop(shared: Arc<SchedulerShared>) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if shared.try_run_one() {
            continue;
        }
        let mut guard = shared.sleep.lock();
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        // Bounded wait: a notify between try_run_one and this point would
        // otherwise be lost for good.
        let _ = shared.wake.wait_for(&mut guard, Duration::from_millis(1));
    }
}

/// Ring-based job scheduler with a pool of worker threads.
///
/// The constructing thread is a participant, not just a submitter: the
/// `complete*` calls run ready jobs instead of blocking idle.
pub struct JobScheduler {
    shared: Arc<SchedulerShared>,
    workers: Vec<JoinHandle<()>>,
    cursor: usize,
}

impl JobScheduler {
    /// Creates a scheduler with `worker_threads` workers, defaulting to
    /// one fewer than the available hardware parallelism. Zero workers is
    /// valid; all jobs then run inside the `complete*` calls.
    #[must_use]
    pub fn new(worker_threads: Option<usize>) -> Self {
        let count = worker_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(0)
        });
        let shared = Arc::new(SchedulerShared {
            slots: (0..RING_SLOTS).map(|_| GroupSlot::default()).collect(),
            outstanding: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            scan: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
        });
        let workers = (0..count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("strata-worker-{index}"))
                    .spawn(move || worker_loop(shared))
                    .unwrap_or_else(|err| panic!("failed to spawn worker thread: {err}"))
            })
            .collect();
        tracing::debug!(workers = count, "job scheduler up");
        Self {
            shared,
            workers,
            cursor: 0,
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Starts a job group with the given declared access and infers its
    /// dependency.
    ///
    /// If the ring has wrapped all the way around onto a group that is
    /// still outstanding, every outstanding job is drained first. That
    /// only happens when more than 256 groups are started in one pass.
    pub fn start_group(&mut self, query: ComponentQuery) -> JobGroupId {
        let slot_index = self.cursor;
        self.cursor = (self.cursor + 1) % RING_SLOTS;

        if self.shared.slots[slot_index].total.load(Ordering::Acquire) > 0 {
            tracing::warn!(
                slot = slot_index,
                "group ring wrapped onto an incomplete group, draining all jobs"
            );
            self.complete_all();
        }

        let slot = &self.shared.slots[slot_index];
        let epoch = slot.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        *slot.query.lock() = query;

        // Nearest older outstanding collision wins; farther conflicts are
        // reached transitively through that group's own dependency.
        let mut dependency = None;
        for offset in 1..RING_SLOTS {
            let index = (slot_index + RING_SLOTS - offset) % RING_SLOTS;
            let other = &self.shared.slots[index];
            if other.total.load(Ordering::Acquire) == 0 {
                continue;
            }
            if other.query.lock().collides_with(&query) {
                dependency = Some((index, other.epoch.load(Ordering::Acquire)));
                break;
            }
        }
        *slot.dependency.lock() = dependency;

        JobGroupId {
            slot: slot_index as u8,
            epoch,
        }
    }

    /// Queues `job` into `group` and wakes the pool.
    ///
    /// # Panics
    /// Panics if `group` is stale, meaning its slot has since been
    /// reused for a newer group.
    pub fn queue_job<F: FnOnce() + Send + 'static>(&self, group: JobGroupId, job: F) {
        let slot = &self.shared.slots[group.slot as usize];
        assert_eq!(
            slot.epoch.load(Ordering::Acquire),
            group.epoch,
            "job queued against a retired group"
        );
        {
            let mut queue = slot.queue.lock();
            queue.push_back(Box::new(job));
            slot.total.fetch_add(1, Ordering::AcqRel);
            slot.grab.fetch_add(1, Ordering::AcqRel);
            self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        }
        self.shared.wake.notify_all();
    }

    /// Dependency recorded for `group`, if the group is still current and
    /// has one. Mostly useful for inspection.
    #[must_use]
    pub fn dependency_of(&self, group: JobGroupId) -> Option<JobGroupId> {
        let slot = &self.shared.slots[group.slot as usize];
        if slot.epoch.load(Ordering::Acquire) != group.epoch {
            return None;
        }
        (*slot.dependency.lock()).map(|(index, epoch)| JobGroupId {
            slot: index as u8,
            epoch,
        })
    }

    /// Whether every job of `group` has finished. An epoch mismatch means
    /// the slot was recycled, which also counts as finished.
    #[must_use]
    pub fn is_complete(&self, group: JobGroupId) -> bool {
        let slot = &self.shared.slots[group.slot as usize];
        slot.epoch.load(Ordering::Acquire) != group.epoch
            || slot.total.load(Ordering::Acquire) == 0
    }

    /// Runs and waits until every job of `group` has finished. The caller
    /// participates, claiming ready jobs of any group while it waits.
    pub fn complete(&self, group: JobGroupId) {
        while !self.is_complete(group) {
            if !self.shared.try_run_one() {
                thread::yield_now();
            }
        }
    }

    /// Runs and waits until no job of any group remains. The caller
    /// participates.
    pub fn complete_all(&self) {
        while self.shared.outstanding.load(Ordering::Acquire) > 0 {
            if !self.shared.try_run_one() {
                thread::yield_now();
            }
        }
    }

    /// Number of jobs that panicked since the scheduler was created.
    #[must_use]
    pub fn failed_jobs(&self) -> usize {
        self.shared.failed.load(Ordering::Acquire)
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        // Never abandon queued work before tearing the pool down.
        self.complete_all();
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentRegistry;

    struct Position;
    struct Velocity;

    fn queries() -> (ComponentQuery, ComponentQuery, ComponentQuery) {
        let mut reg = ComponentRegistry::new();
        let writer = ComponentQuery::builder(&mut reg)
            .write::<Position>()
            .build()
            .unwrap();
        let reader = ComponentQuery::builder(&mut reg)
            .read::<Position>()
            .build()
            .unwrap();
        let unrelated = ComponentQuery::builder(&mut reg)
            .write::<Velocity>()
            .build()
            .unwrap();
        (writer, reader, unrelated)
    }

    #[test]
    fn colliding_group_depends_on_nearest_older_group() {
        let (writer, reader, unrelated) = queries();
        let mut scheduler = JobScheduler::new(Some(0));

        let first = scheduler.start_group(writer);
        scheduler.queue_job(first, || {});
        let second = scheduler.start_group(unrelated);
        scheduler.queue_job(second, || {});
        let third = scheduler.start_group(reader);

        assert_eq!(scheduler.dependency_of(first), None);
        assert_eq!(scheduler.dependency_of(second), None);
        assert_eq!(scheduler.dependency_of(third), Some(first));
        scheduler.complete_all();
    }

    #[test]
    fn completed_groups_are_not_dependencies() {
        let (writer, reader, _) = queries();
        let mut scheduler = JobScheduler::new(Some(0));

        let first = scheduler.start_group(writer);
        scheduler.queue_job(first, || {});
        scheduler.complete(first);

        // All of first's jobs finished, so the reader starts clean.
        let second = scheduler.start_group(reader);
        assert_eq!(scheduler.dependency_of(second), None);
    }

    #[test]
    fn caller_participates_with_zero_workers() {
        let mut scheduler = JobScheduler::new(Some(0));
        assert_eq!(scheduler.worker_count(), 0);

        let counter = Arc::new(AtomicUsize::new(0));
        let group = scheduler.start_group(ComponentQuery::empty());
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            scheduler.queue_job(group, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert!(!scheduler.is_complete(group));
        scheduler.complete_all();
        assert!(scheduler.is_complete(group));
        assert_eq!(counter.load(Ordering::Relaxed), 16);

        // Draining an already-idle scheduler is a no-op.
        scheduler.complete_all();
        assert_eq!(counter.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn job_scan_rotates_across_slots() {
        let mut scheduler = JobScheduler::new(Some(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = scheduler.start_group(ComponentQuery::empty());
        for _ in 0..2 {
            let order = Arc::clone(&order);
            scheduler.queue_job(first, move || order.lock().push("first"));
        }
        let second = scheduler.start_group(ComponentQuery::empty());
        {
            let order = Arc::clone(&order);
            scheduler.queue_job(second, move || order.lock().push("second"));
        }

        // Each claim starts the scan one slot further, so the second
        // claim reaches the second group before draining the first.
        assert!(scheduler.shared.try_run_one());
        assert!(scheduler.shared.try_run_one());
        assert!(scheduler.shared.try_run_one());
        assert!(!scheduler.shared.try_run_one());
        assert_eq!(*order.lock(), vec!["first", "second", "first"]);
    }

    #[test]
    fn dependent_jobs_observe_their_dependency() {
        let (writer, reader, _) = queries();
        let mut scheduler = JobScheduler::new(Some(2));

        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::new(AtomicBool::new(false));

        let first = scheduler.start_group(writer);
        {
            let flag = Arc::clone(&flag);
            scheduler.queue_job(first, move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
            });
        }
        let second = scheduler.start_group(reader);
        {
            let flag = Arc::clone(&flag);
            let observed = Arc::clone(&observed);
            scheduler.queue_job(second, move || {
                observed.store(flag.load(Ordering::Acquire), Ordering::Release);
            });
        }
        scheduler.complete_all();
        assert!(observed.load(Ordering::Acquire));
    }

    #[test]
    fn panicking_job_is_isolated_and_counted() {
        let mut scheduler = JobScheduler::new(Some(0));
        let counter = Arc::new(AtomicUsize::new(0));

        let group = scheduler.start_group(ComponentQuery::empty());
        scheduler.queue_job(group, || panic!("deliberate test panic"));
        {
            let counter = Arc::clone(&counter);
            scheduler.queue_job(group, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        scheduler.complete_all();

        assert_eq!(scheduler.failed_jobs(), 1);
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        // The scheduler keeps working after a failure.
        let group = scheduler.start_group(ComponentQuery::empty());
        {
            let counter = Arc::clone(&counter);
            scheduler.queue_job(group, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        scheduler.complete_all();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn stale_group_handles_are_rejected() {
        let mut scheduler = JobScheduler::new(Some(0));
        let stale = scheduler.start_group(ComponentQuery::empty());
        // Reuse the same slot by walking the whole ring.
        for _ in 0..RING_SLOTS {
            scheduler.start_group(ComponentQuery::empty());
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            scheduler.queue_job(stale, || {});
        }));
        assert!(result.is_err());
        assert_eq!(scheduler.dependency_of(stale), None);
    }

    #[test]
    fn ring_wraparound_drains_outstanding_groups() {
        let mut scheduler = JobScheduler::new(Some(0));
        let counter = Arc::new(AtomicUsize::new(0));

        let first = scheduler.start_group(ComponentQuery::empty());
        {
            let counter = Arc::clone(&counter);
            scheduler.queue_job(first, move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        // Walking the ring back onto the incomplete slot forces a drain.
        for _ in 0..RING_SLOTS {
            scheduler.start_group(ComponentQuery::empty());
        }
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
