//! The lifecycle engine: ready/delay/buried/wait queues, the job registry,
//! and the verb handlers that mutate them (`spec.md` §3, §4.3, §4.4).
//!
//! Concurrency model: every mutation happens through `&mut Core` under one
//! `std::sync::Mutex` (see `SPEC_FULL.md` §2), so nothing in this module
//! needs to be thread-safe on its own. Connection tasks lock, call a single
//! method, and unlock; the deadline task (`deadline.rs`) does the same on a
//! timer.

pub mod deadline;
pub mod pq;
pub mod stats;

use std::collections::{BTreeSet, HashMap, VecDeque};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::types::conn::{ConnId, ConnIdGen};
use crate::types::job::{Job, JobId, JobIdGen};
use crate::types::states::JobState;

use stats::{JobStats, ServerStats};

/// Ready jobs below this priority are counted separately in stats
/// (`spec.md` glossary: "Urgent").
pub const URGENT_THRESHOLD: u32 = 1024;

/// A job handed off to a connection that was waiting on `reserve`.
#[derive(Debug)]
pub struct Handoff {
    pub id: JobId,
    pub pri: u32,
    pub body: Bytes,
}

struct Waiter {
    conn: ConnId,
    tx: oneshot::Sender<Handoff>,
}

#[derive(Debug, Default)]
struct ConnMeta {
    is_producer: bool,
    is_worker: bool,
    is_waiting: bool,
    reserved: BTreeSet<(Instant, JobId)>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted(JobId),
    Buried(JobId),
    Draining,
    TooBig,
}

pub enum ReserveOutcome {
    Immediate(Handoff),
    Pending(oneshot::Receiver<Handoff>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    Buried,
    NotFound,
}

pub struct Core {
    jobs: HashMap<JobId, Job>,
    job_ids: JobIdGen,
    conn_ids: ConnIdGen,

    ready: pq::PriorityQueue<u32>,
    delay: pq::PriorityQueue<Instant>,
    buried: VecDeque<JobId>,

    wait_queue: VecDeque<Waiter>,
    conns: HashMap<ConnId, ConnMeta>,

    urgent_ct: u64,
    waiting_ct: u64,
    draining: bool,
    max_job_size: u32,

    started: Instant,
    pid: u32,
    stats: ServerStats,
}

impl Core {
    pub fn new(max_job_size: u32, draining: bool) -> Self {
        Self {
            jobs: HashMap::new(),
            job_ids: JobIdGen::default(),
            conn_ids: ConnIdGen::default(),
            ready: pq::PriorityQueue::new(pq::HEAP_SIZE),
            delay: pq::PriorityQueue::new(pq::HEAP_SIZE),
            buried: VecDeque::new(),
            wait_queue: VecDeque::new(),
            conns: HashMap::new(),
            urgent_ct: 0,
            waiting_ct: 0,
            draining,
            max_job_size,
            started: Instant::now(),
            pid: std::process::id(),
            stats: ServerStats {
                version: env!("CARGO_PKG_VERSION"),
                max_job_size: max_job_size as u64,
                draining,
                ..Default::default()
            },
        }
    }

    pub fn max_job_size(&self) -> u32 {
        self.max_job_size
    }

    pub fn set_draining(&mut self, draining: bool) {
        self.draining = draining;
        self.stats.draining = draining;
    }

    // ---- connection bookkeeping ----------------------------------------

    pub fn register_conn(&mut self) -> ConnId {
        let id = self.conn_ids.next();
        self.conns.insert(id, ConnMeta::default());
        self.stats.current_connections += 1;
        self.stats.total_connections += 1;
        id
    }

    /// Tears down a closed connection: cancels any outstanding `reserve`
    /// wait and requeues every job it held reserved back to ready, burying
    /// it instead if the ready queue is full (`spec.md` §5: "at-least-once
    /// delivery on worker crash").
    pub fn unregister_conn(&mut self, conn: ConnId) {
        self.cancel_wait(conn);

        let Some(meta) = self.conns.remove(&conn) else {
            return;
        };

        let ids: Vec<JobId> = meta.reserved.iter().map(|&(_, id)| id).collect();
        self.stats.current_jobs_reserved = self.stats.current_jobs_reserved.saturating_sub(ids.len() as u64);
        for id in ids {
            self.requeue_after_reservation_loss(id);
        }

        if meta.is_producer {
            self.stats.current_producers = self.stats.current_producers.saturating_sub(1);
        }
        if meta.is_worker {
            self.stats.current_workers = self.stats.current_workers.saturating_sub(1);
        }
        if self.stats.current_connections > 0 {
            self.stats.current_connections -= 1;
        }
    }

    fn requeue_after_reservation_loss(&mut self, id: JobId) {
        if self.enqueue_ready(id).is_none() {
            self.enqueue_buried_back(id);
        }
    }

    pub fn mark_producer(&mut self, conn: ConnId) {
        if let Some(meta) = self.conns.get_mut(&conn) {
            if !meta.is_producer {
                meta.is_producer = true;
                self.stats.current_producers += 1;
            }
        }
    }

    fn mark_worker(&mut self, conn: ConnId) {
        if let Some(meta) = self.conns.get_mut(&conn) {
            if !meta.is_worker {
                meta.is_worker = true;
                self.stats.current_workers += 1;
            }
        }
    }

    // ---- put -------------------------------------------------------------

    pub fn put(&mut self, pri: u32, delay: u32, ttr: u32, body: Bytes, conn: ConnId) -> PutOutcome {
        self.mark_producer(conn);
        self.stats.cmd_put += 1;

        if self.draining {
            return PutOutcome::Draining;
        }
        if body.len() as u32 > self.max_job_size {
            return PutOutcome::TooBig;
        }

        let id = self.job_ids.next();
        let now = Instant::now();
        let job = Job {
            id,
            pri,
            ttr: ttr.max(1),
            body,
            state: JobState::Ready, // placeholder, fixed up below
            created: now,
            reserves: 0,
            timeouts: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
        };
        self.jobs.insert(id, job);
        self.stats.total_jobs += 1;

        if delay > 0 {
            let until = now + std::time::Duration::from_secs(delay as u64);
            if self.enqueue_delayed(id, until) {
                PutOutcome::Inserted(id)
            } else {
                self.enqueue_buried_back(id);
                PutOutcome::Buried(id)
            }
        } else if self.enqueue_ready(id).is_some() {
            PutOutcome::Inserted(id)
        } else {
            self.enqueue_buried_back(id);
            PutOutcome::Buried(id)
        }
    }

    // ---- enqueue helpers ---------------------------------------------------

    /// Moves a job into the ready queue and runs dispatch. Returns `None` if
    /// the ready queue was full (the job's state is left untouched; the
    /// caller is responsible for burying it instead).
    fn enqueue_ready(&mut self, id: JobId) -> Option<()> {
        let pri = self.jobs.get(&id)?.pri;
        if !self.ready.give(pri, id) {
            return None;
        }
        if pri < URGENT_THRESHOLD {
            self.urgent_ct += 1;
        }
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Ready;
        }
        self.stats.current_jobs_ready = self.ready.used() as u64;
        self.stats.current_jobs_urgent = self.urgent_ct;
        self.process_queue();
        Some(())
    }

    fn enqueue_delayed(&mut self, id: JobId, until: Instant) -> bool {
        if !self.delay.give(until, id) {
            return false;
        }
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Delayed { until };
        }
        self.stats.current_jobs_delayed = self.delay.used() as u64;
        true
    }

    /// Appends a job to the tail of the buried list (ordinary `bury`).
    fn enqueue_buried(&mut self, id: JobId) {
        self.buried.push_back(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Buried;
        }
        self.stats.current_jobs_buried = self.buried.len() as u64;
    }

    /// Re-inserts a job at the head of the buried list: used when a job is
    /// sent back to burial because a promotion attempt (reservation loss,
    /// release, kick) failed to fit in the ready queue (`spec.md` §9: "the
    /// source's intrusive-list sentinel" / "head-insert semantics at kick
    /// time").
    fn enqueue_buried_back(&mut self, id: JobId) {
        self.buried.push_front(id);
        if let Some(job) = self.jobs.get_mut(&id) {
            job.state = JobState::Buried;
        }
        self.stats.current_jobs_buried = self.buried.len() as u64;
    }

    // ---- dispatch ----------------------------------------------------------

    /// Matches waiting connections with ready jobs, strict FIFO over both
    /// sides (`spec.md` §4.4).
    fn process_queue(&mut self) {
        while !self.wait_queue.is_empty() {
            let Some((pri, id)) = self.ready.peek() else {
                break;
            };
            self.ready.take();
            if pri < URGENT_THRESHOLD {
                self.urgent_ct = self.urgent_ct.saturating_sub(1);
            }
            self.stats.current_jobs_ready = self.ready.used() as u64;
            self.stats.current_jobs_urgent = self.urgent_ct;

            let waiter = self.wait_queue.pop_front().expect("checked non-empty");
            self.waiting_ct = self.waiting_ct.saturating_sub(1);
            self.stats.current_waiting = self.waiting_ct;
            if let Some(meta) = self.conns.get_mut(&waiter.conn) {
                meta.is_waiting = false;
            }

            let now = Instant::now();
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            let deadline = now + std::time::Duration::from_secs(job.ttr as u64);
            job.state = JobState::Reserved {
                by: waiter.conn,
                deadline,
            };
            job.reserves += 1;
            self.stats.current_jobs_reserved += 1;

            if let Some(meta) = self.conns.get_mut(&waiter.conn) {
                meta.reserved.insert((deadline, id));
            }

            let handoff = Handoff {
                id,
                pri,
                body: job.body.clone(),
            };
            // If the receiver already hung up (connection closed between
            // sending reserve and now), give the job back to the ready
            // queue rather than dropping it.
            if waiter.tx.send(handoff).is_err() {
                debug!(job = %id, "reserve receiver gone, reclaiming job");
                self.release_internal(waiter.conn, id, None, None);
            }
        }
    }

    // ---- reserve -------------------------------------------------------

    pub fn reserve(&mut self, conn: ConnId) -> ReserveOutcome {
        self.mark_worker(conn);
        self.stats.cmd_reserve += 1;

        let (tx, mut rx) = oneshot::channel();
        self.wait_queue.push_back(Waiter { conn, tx });
        self.waiting_ct += 1;
        self.stats.current_waiting = self.waiting_ct;
        if let Some(meta) = self.conns.get_mut(&conn) {
            meta.is_waiting = true;
        }

        self.process_queue();

        match rx.try_recv() {
            Ok(handoff) => ReserveOutcome::Immediate(handoff),
            Err(_) => ReserveOutcome::Pending(rx),
        }
    }

    /// Removes `conn`'s outstanding wait-queue entry, if any. Called when a
    /// connection disconnects or its reserve is otherwise abandoned.
    pub fn cancel_wait(&mut self, conn: ConnId) {
        let before = self.wait_queue.len();
        self.wait_queue.retain(|w| w.conn != conn);
        let removed = before - self.wait_queue.len();
        if removed > 0 {
            self.waiting_ct = self.waiting_ct.saturating_sub(removed as u64);
            self.stats.current_waiting = self.waiting_ct;
        }
        if let Some(meta) = self.conns.get_mut(&conn) {
            meta.is_waiting = false;
        }
    }

    // ---- delete / release / bury / touch -------------------------------

    pub fn delete(&mut self, conn: ConnId, id: JobId) -> bool {
        self.stats.cmd_delete += 1;

        let state = match self.jobs.get(&id) {
            Some(job) => job.state,
            None => return false,
        };

        let removable = match state {
            JobState::Reserved { by, .. } => by == conn,
            JobState::Buried => true,
            _ => false,
        };
        if !removable {
            return false;
        }

        self.remove_from_container(id, state);
        self.jobs.remove(&id);
        true
    }

    fn remove_from_container(&mut self, id: JobId, state: JobState) {
        match state {
            JobState::Reserved { by, deadline } => {
                if let Some(meta) = self.conns.get_mut(&by) {
                    meta.reserved.remove(&(deadline, id));
                }
                self.stats.current_jobs_reserved = self.stats.current_jobs_reserved.saturating_sub(1);
            },
            JobState::Buried => {
                self.buried.retain(|&j| j != id);
                self.stats.current_jobs_buried = self.buried.len() as u64;
            },
            JobState::Ready | JobState::Delayed { .. } => {
                // Ready/delayed jobs are never targeted directly by id in
                // this protocol subset (only reserved/buried jobs are), but
                // handle it defensively for completeness.
            },
        }
    }

    pub fn release(&mut self, conn: ConnId, id: JobId, pri: u32, delay: u32) -> ReleaseOutcome {
        self.stats.cmd_release += 1;
        self.release_internal(conn, id, Some(pri), Some(delay))
    }

    fn release_internal(
        &mut self,
        conn: ConnId,
        id: JobId,
        pri: Option<u32>,
        delay: Option<u32>,
    ) -> ReleaseOutcome {
        let Some(job) = self.jobs.get(&id) else {
            return ReleaseOutcome::NotFound;
        };
        let JobState::Reserved { by, deadline } = job.state else {
            return ReleaseOutcome::NotFound;
        };
        if by != conn {
            return ReleaseOutcome::NotFound;
        }

        if let Some(meta) = self.conns.get_mut(&by) {
            meta.reserved.remove(&(deadline, id));
        }
        self.stats.current_jobs_reserved = self.stats.current_jobs_reserved.saturating_sub(1);

        let job = self.jobs.get_mut(&id).expect("checked above");
        if let Some(pri) = pri {
            job.pri = pri;
        }
        job.releases += 1;
        let delay = delay.unwrap_or(0);

        if delay > 0 {
            let until = Instant::now() + std::time::Duration::from_secs(delay as u64);
            if self.enqueue_delayed(id, until) {
                ReleaseOutcome::Released
            } else {
                self.enqueue_buried_back(id);
                ReleaseOutcome::Buried
            }
        } else if self.enqueue_ready(id).is_some() {
            ReleaseOutcome::Released
        } else {
            self.enqueue_buried_back(id);
            ReleaseOutcome::Buried
        }
    }

    pub fn bury(&mut self, conn: ConnId, id: JobId, pri: u32) -> bool {
        self.stats.cmd_bury += 1;

        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        let JobState::Reserved { by, deadline } = job.state else {
            return false;
        };
        if by != conn {
            return false;
        }

        if let Some(meta) = self.conns.get_mut(&by) {
            meta.reserved.remove(&(deadline, id));
        }
        self.stats.current_jobs_reserved = self.stats.current_jobs_reserved.saturating_sub(1);

        let job = self.jobs.get_mut(&id).expect("checked above");
        job.pri = pri;
        job.buries += 1;
        self.enqueue_buried(id);
        true
    }

    pub fn touch(&mut self, conn: ConnId, id: JobId) -> bool {
        self.stats.cmd_touch += 1;

        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        let JobState::Reserved { by, deadline } = job.state else {
            return false;
        };
        if by != conn {
            return false;
        }

        let new_deadline = Instant::now() + std::time::Duration::from_secs(job.ttr as u64);
        if let Some(meta) = self.conns.get_mut(&by) {
            meta.reserved.remove(&(deadline, id));
            meta.reserved.insert((new_deadline, id));
        }
        self.jobs.get_mut(&id).expect("checked above").state = JobState::Reserved {
            by,
            deadline: new_deadline,
        };
        true
    }

    // ---- kick ------------------------------------------------------------

    /// Kicks up to `bound` jobs: from the buried list if any exist
    /// (oldest first), otherwise from the delay queue (soonest first).
    /// Returns the number actually kicked (`spec.md` §4.3).
    pub fn kick(&mut self, bound: u32) -> u32 {
        self.stats.cmd_kick += 1;

        let mut kicked = 0;
        if !self.buried.is_empty() {
            while kicked < bound {
                let Some(id) = self.buried.pop_front() else {
                    break;
                };
                self.stats.current_jobs_buried = self.buried.len() as u64;
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.kicks += 1;
                }
                if self.enqueue_ready(id).is_some() {
                    kicked += 1;
                } else {
                    self.enqueue_buried_back(id);
                    break;
                }
            }
        } else {
            while kicked < bound {
                let Some((until, id)) = self.delay.take() else {
                    break;
                };
                self.stats.current_jobs_delayed = self.delay.used() as u64;
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.kicks += 1;
                }
                if self.enqueue_ready(id).is_some() {
                    kicked += 1;
                } else if self.enqueue_delayed(id, until) {
                    break;
                } else {
                    self.enqueue_buried_back(id);
                    break;
                }
            }
        }
        kicked
    }

    // ---- peek --------------------------------------------------------

    /// `peek` with no id: the highest-priority buried job if any exist,
    /// otherwise the soonest-to-become-ready delayed job.
    pub fn peek_any(&mut self) -> Option<(JobId, u32, Bytes)> {
        self.stats.cmd_peek += 1;
        if let Some(&id) = self.buried.front() {
            return self.jobs.get(&id).map(|j| (j.id, j.pri, j.body.clone()));
        }
        if let Some((_, id)) = self.delay.peek() {
            return self.jobs.get(&id).map(|j| (j.id, j.pri, j.body.clone()));
        }
        None
    }

    pub fn peek_id(&mut self, id: JobId) -> Option<(JobId, u32, Bytes)> {
        self.stats.cmd_peek += 1;
        self.jobs.get(&id).map(|j| (j.id, j.pri, j.body.clone()))
    }

    // ---- stats ---------------------------------------------------------

    pub fn stats_global(&mut self) -> ServerStats {
        self.stats.cmd_stats += 1;
        self.stats.uptime = self.started.elapsed().as_secs() as u32;
        self.stats.pid = self.pid;
        self.stats.clone()
    }

    pub fn stats_job(&mut self, id: JobId) -> Option<JobStats> {
        self.stats.cmd_stats += 1;
        let job = self.jobs.get(&id)?;
        let now = Instant::now();
        let age = now.saturating_duration_since(job.created).as_secs();

        let (delay, time_left) = match job.state {
            JobState::Delayed { until } => {
                let left = until.saturating_duration_since(now).as_secs();
                (left, left)
            },
            JobState::Reserved { deadline, .. } => {
                (0, deadline.saturating_duration_since(now).as_secs())
            },
            JobState::Ready | JobState::Buried => (0, 0),
        };

        Some(JobStats {
            id: job.id.get(),
            state: job.state,
            pri: job.pri,
            age,
            delay,
            ttr: job.ttr,
            time_left,
            reserves: job.reserves,
            timeouts: job.timeouts,
            releases: job.releases,
            buries: job.buries,
            kicks: job.kicks,
        })
    }

    // ---- deadline engine hooks (see deadline.rs) ------------------------

    /// Earliest instant this core needs to be woken at: the soonest delayed
    /// job's deadline, or the soonest reserved job's deadline across all
    /// connections, whichever comes first (`spec.md` §4.5).
    pub(crate) fn next_wakeup(&self) -> Option<Instant> {
        let soonest_delay = self.delay.peek().map(|(until, _)| until);
        let soonest_reserved = self
            .conns
            .values()
            .filter_map(|meta| meta.reserved.iter().next().map(|&(deadline, _)| deadline))
            .min();

        match (soonest_delay, soonest_reserved) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Runs one deadline sweep: promotes due delayed jobs to ready and
    /// reclaims timed-out reservations. Returns the next wakeup instant.
    pub(crate) fn run_deadline_tick(&mut self) -> Option<Instant> {
        let now = Instant::now();

        while let Some((until, _)) = self.delay.peek() {
            if until > now {
                break;
            }
            let (_, id) = self.delay.take().expect("peeked Some above");
            self.stats.current_jobs_delayed = self.delay.used() as u64;
            if self.enqueue_ready(id).is_none() {
                self.enqueue_buried_back(id);
            }
        }

        let expired: Vec<(ConnId, JobId)> = self
            .conns
            .iter()
            .flat_map(|(&conn, meta)| {
                meta.reserved
                    .iter()
                    .take_while(|&&(deadline, _)| deadline <= now)
                    .map(move |&(_, id)| (conn, id))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (conn, id) in expired {
            if let Some(meta) = self.conns.get_mut(&conn) {
                // Recompute the head each time: an earlier iteration in this
                // loop may have already popped the very head we're about to
                // touch if two jobs on the same connection both expired.
                if let Some(&(deadline, head_id)) = meta.reserved.iter().next() {
                    if head_id == id && deadline <= now {
                        meta.reserved.remove(&(deadline, id));
                    } else {
                        continue;
                    }
                } else {
                    continue;
                }
            } else {
                continue;
            }

            self.stats.current_jobs_reserved = self.stats.current_jobs_reserved.saturating_sub(1);
            self.stats.job_timeouts += 1;
            if let Some(job) = self.jobs.get_mut(&id) {
                job.timeouts += 1;
            }
            self.requeue_after_reservation_loss(id);
        }

        self.next_wakeup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test(start_paused = true)]
    async fn put_then_reserve_round_trip() {
        let mut core = Core::new(65_535, false);
        let producer = core.register_conn();
        let consumer = core.register_conn();

        let PutOutcome::Inserted(id) = core.put(10, 0, 60, body("a"), producer) else {
            panic!("expected insert");
        };

        match core.reserve(consumer) {
            ReserveOutcome::Immediate(h) => {
                assert_eq!(h.id, id);
                assert_eq!(h.body, body("a"));
            },
            ReserveOutcome::Pending(_) => panic!("expected immediate reservation"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn priority_ordering_scenario() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let c = core.register_conn();

        core.put(5, 0, 60, body("a"), p);
        core.put(1, 0, 60, body("b"), p);
        core.put(5, 0, 60, body("c"), p);

        let mut out = Vec::new();
        for _ in 0..3 {
            match core.reserve(c) {
                ReserveOutcome::Immediate(h) => out.push(h.body),
                ReserveOutcome::Pending(_) => panic!("server is idle, should be immediate"),
            }
        }
        assert_eq!(out, vec![body("b"), body("a"), body("c")]);
    }

    #[tokio::test(start_paused = true)]
    async fn reserve_blocks_until_put() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let c = core.register_conn();

        let rx = match core.reserve(c) {
            ReserveOutcome::Pending(rx) => rx,
            ReserveOutcome::Immediate(_) => panic!("queue is empty, should block"),
        };

        let PutOutcome::Inserted(id) = core.put(0, 0, 60, body("x"), p) else {
            panic!("expected insert");
        };

        let handoff = rx.await.expect("reservation should complete");
        assert_eq!(handoff.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_connection_requeues_reserved_jobs() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let c = core.register_conn();

        core.put(0, 0, 60, body("x"), p);
        let ReserveOutcome::Immediate(h) = core.reserve(c) else {
            panic!("expected immediate reservation");
        };

        core.unregister_conn(c);

        let c2 = core.register_conn();
        match core.reserve(c2) {
            ReserveOutcome::Immediate(h2) => assert_eq!(h2.id, h.id),
            ReserveOutcome::Pending(_) => panic!("job should have been requeued"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bury_then_kick_then_reserve() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let c = core.register_conn();

        let PutOutcome::Inserted(id) = core.put(0, 0, 60, body("x"), p) else {
            panic!("expected insert");
        };
        let ReserveOutcome::Immediate(h) = core.reserve(c) else {
            panic!("expected immediate reservation");
        };
        assert!(core.bury(c, h.id, 0));

        let (peek_id, ..) = core.peek_any().expect("buried job should be visible");
        assert_eq!(peek_id, id);

        assert_eq!(core.kick(1), 1);

        match core.reserve(c) {
            ReserveOutcome::Immediate(h2) => assert_eq!(h2.id, id),
            ReserveOutcome::Pending(_) => panic!("kicked job should be ready"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttr_expiry_redelivers_and_counts_timeout() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let c1 = core.register_conn();
        let c2 = core.register_conn();

        let PutOutcome::Inserted(id) = core.put(0, 0, 1, body("x"), p) else {
            panic!("expected insert");
        };
        let ReserveOutcome::Immediate(_) = core.reserve(c1) else {
            panic!("expected immediate reservation");
        };

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        core.run_deadline_tick();

        match core.reserve(c2) {
            ReserveOutcome::Immediate(h) => assert_eq!(h.id, id),
            ReserveOutcome::Pending(_) => panic!("job should have timed out back to ready"),
        }

        let stats = core.stats_job(id).expect("job still exists");
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn draining_rejects_put_but_not_delete() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        let PutOutcome::Inserted(id) = core.put(0, 0, 60, body("x"), p) else {
            panic!("expected insert");
        };
        core.set_draining(true);

        assert_eq!(core.put(0, 0, 60, body("y"), p), PutOutcome::Draining);

        let c = core.register_conn();
        let ReserveOutcome::Immediate(h) = core.reserve(c) else {
            panic!("existing job should still be reservable while draining");
        };
        assert_eq!(h.id, id);
        assert!(core.delete(c, id));
    }

    #[tokio::test(start_paused = true)]
    async fn urgent_count_tracks_ready_queue() {
        let mut core = Core::new(65_535, false);
        let p = core.register_conn();
        core.put(URGENT_THRESHOLD - 1, 0, 60, body("urgent"), p);
        core.put(URGENT_THRESHOLD, 0, 60, body("normal"), p);
        assert_eq!(core.urgent_ct, 1);

        let c = core.register_conn();
        core.reserve(c);
        assert_eq!(core.urgent_ct, 0);
    }
}
