//! Logical-tick scheduler microkernel.
//!
//! The scheduler owns the tick counter, the virtual-user registry, the
//! run's single PRNG, and a wakeup queue. It never retries anything:
//! failures from lower layers surface as events and completions.

pub mod queue;
pub mod vu;

pub use queue::TickQueue;
pub use vu::{VirtualUser, VuState};

use crate::error::{LogError, SchedulerError, Z6Error};
use crate::event::record::{Event, EventType, SchedulerTickPayload};
use crate::event::EventLog;
use crate::rng::Rng;

/// Upper bound on concurrently registered VUs.
pub const MAX_VUS: u32 = 10_000;

/// The logical-tick scheduler.
pub struct Scheduler {
    tick: u64,
    vus: Vec<VirtualUser>,
    max_vus: u32,
    rng: Rng,
    wakeups: TickQueue<u32>,
    next_vu_id: u32,
}

impl Scheduler {
    pub fn new(seed: u64, max_vus: u32) -> Self {
        Self {
            tick: 0,
            vus: Vec::new(),
            max_vus: max_vus.min(MAX_VUS),
            rng: Rng::new(seed),
            wakeups: TickQueue::new(),
            next_vu_id: 1,
        }
    }

    /// Current logical tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the clock by one tick and record it. Strictly monotonic.
    pub fn advance_tick(&mut self, log: &mut EventLog) -> Result<u64, LogError> {
        self.tick += 1;
        let payload = SchedulerTickPayload {
            active_vus: self.active_vu_count(),
        };
        log.append(Event::new(
            self.tick,
            0,
            EventType::SchedulerTick,
            payload.encode(),
        ))?;
        Ok(self.tick)
    }

    /// Register a new VU in state `Spawned` and emit `vu_spawned`. The VU
    /// is also queued for a wakeup at the current tick so the next tick's
    /// drain promotes it to `Ready`.
    pub fn spawn_vu(&mut self, log: &mut EventLog) -> Result<u32, Z6Error> {
        if self.vus.len() as u32 >= self.max_vus {
            return Err(SchedulerError::TooManyVus.into());
        }
        let id = self.next_vu_id;
        self.next_vu_id += 1;
        self.vus.push(VirtualUser::new(id, self.tick));
        self.wakeups.push(self.tick, id);
        log.append(Event::empty(self.tick, id, EventType::VuSpawned))?;
        tracing::debug!(vu_id = id, tick = self.tick, "spawned virtual user");
        Ok(id)
    }

    /// Schedule a wakeup for `vu_id` at `tick`.
    pub fn schedule_wakeup(&mut self, tick: u64, vu_id: u32) {
        self.wakeups.push(tick, vu_id);
    }

    /// Drain all wakeups due at or before the current tick, in
    /// (tick, insertion) order.
    pub fn take_due_wakeups(&mut self) -> Vec<u32> {
        let mut due = Vec::new();
        while let Some(id) = self.wakeups.pop_due(self.tick) {
            due.push(id);
        }
        due
    }

    /// Find a VU by id. Linear scan; the registry is bounded.
    pub fn vu(&self, id: u32) -> Option<&VirtualUser> {
        self.vus.iter().find(|v| v.id == id)
    }

    pub fn vu_mut(&mut self, id: u32) -> Option<&mut VirtualUser> {
        self.vus.iter_mut().find(|v| v.id == id)
    }

    /// All registered VUs in spawn order.
    pub fn vus(&self) -> &[VirtualUser] {
        &self.vus
    }

    pub fn rng_mut(&mut self) -> &mut Rng {
        &mut self.rng
    }

    /// VUs not yet `Complete`.
    pub fn active_vu_count(&self) -> u32 {
        self.vus.iter().filter(|v| !v.is_complete()).count() as u32
    }

    pub fn all_complete(&self) -> bool {
        !self.vus.is_empty() && self.vus.iter().all(|v| v.is_complete())
    }

    /// Cancel the run: every non-`Complete` VU transitions to `Complete`
    /// with a `vu_complete` event, and any pending request is recorded as
    /// cancelled. Returns the cancelled request ids for the engines to
    /// fail.
    pub fn cancel_all(&mut self, log: &mut EventLog) -> Vec<u64> {
        let tick = self.tick;
        let mut cancelled = Vec::new();
        for vu in &mut self.vus {
            if vu.is_complete() {
                continue;
            }
            if let Some(request_id) = vu.pending_request_id.take() {
                cancelled.push(request_id);
                let _ = log.append(Event::empty(tick, vu.id, EventType::RequestCancelled));
            }
            // Legal from every live state.
            let _ = vu.transition(VuState::Complete, tick);
            let _ = log.append(Event::empty(tick, vu.id, EventType::VuComplete));
        }
        tracing::debug!(tick, cancelled = cancelled.len(), "cancelled run");
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> EventLog {
        EventLog::with_capacity(1024)
    }

    #[test]
    fn ticks_are_strictly_monotonic() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let mut prev = sched.tick();
        for _ in 0..100 {
            let t = sched.advance_tick(&mut log).unwrap();
            assert!(t > prev);
            prev = t;
        }
    }

    #[test]
    fn advance_tick_emits_scheduler_tick() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        sched.advance_tick(&mut log).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.get(0).unwrap().event_type, EventType::SchedulerTick);
        assert_eq!(log.get(0).unwrap().tick, 1);
    }

    #[test]
    fn spawn_assigns_increasing_nonzero_ids() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let a = sched.spawn_vu(&mut log).unwrap();
        let b = sched.spawn_vu(&mut log).unwrap();
        assert!(a > 0);
        assert!(b > a);
    }

    #[test]
    fn spawn_emits_vu_spawned() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let id = sched.spawn_vu(&mut log).unwrap();
        let event = log.get(0).unwrap();
        assert_eq!(event.event_type, EventType::VuSpawned);
        assert_eq!(event.vu_id, id);
    }

    #[test]
    fn spawn_fails_above_max() {
        let mut sched = Scheduler::new(1, 2);
        let mut log = log();
        sched.spawn_vu(&mut log).unwrap();
        sched.spawn_vu(&mut log).unwrap();
        assert!(matches!(
            sched.spawn_vu(&mut log),
            Err(Z6Error::Scheduler(SchedulerError::TooManyVus))
        ));
    }

    #[test]
    fn spawned_vu_is_due_for_wakeup() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let id = sched.spawn_vu(&mut log).unwrap();
        assert_eq!(sched.take_due_wakeups(), vec![id]);
        assert!(sched.take_due_wakeups().is_empty());
    }

    #[test]
    fn wakeups_drain_in_fifo_order_within_tick() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let a = sched.spawn_vu(&mut log).unwrap();
        let b = sched.spawn_vu(&mut log).unwrap();
        sched.advance_tick(&mut log).unwrap();
        assert_eq!(sched.take_due_wakeups(), vec![a, b]);
    }

    #[test]
    fn future_wakeups_not_due() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let id = sched.spawn_vu(&mut log).unwrap();
        sched.take_due_wakeups();
        sched.schedule_wakeup(5, id);
        sched.advance_tick(&mut log).unwrap();
        assert!(sched.take_due_wakeups().is_empty());
        for _ in 0..4 {
            sched.advance_tick(&mut log).unwrap();
        }
        assert_eq!(sched.take_due_wakeups(), vec![id]);
    }

    #[test]
    fn vu_lookup_by_id() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let id = sched.spawn_vu(&mut log).unwrap();
        assert!(sched.vu(id).is_some());
        assert!(sched.vu(id + 100).is_none());
        sched.vu_mut(id).unwrap().pending_request_id = Some(7);
        assert_eq!(sched.vu(id).unwrap().pending_request_id, Some(7));
    }

    #[test]
    fn cancel_all_completes_every_vu() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        let a = sched.spawn_vu(&mut log).unwrap();
        let b = sched.spawn_vu(&mut log).unwrap();
        sched.vu_mut(a).unwrap().pending_request_id = Some(7);
        let cancelled = sched.cancel_all(&mut log);
        assert_eq!(cancelled, vec![7]);
        assert!(sched.vu(a).unwrap().is_complete());
        assert!(sched.vu(b).unwrap().is_complete());
        assert!(sched.all_complete());
        let types: Vec<EventType> = log.iter().map(|e| e.event_type).collect();
        assert!(types.contains(&EventType::RequestCancelled));
        assert_eq!(
            types.iter().filter(|t| **t == EventType::VuComplete).count(),
            2
        );
    }

    #[test]
    fn active_count_excludes_complete() {
        let mut sched = Scheduler::new(1, 10);
        let mut log = log();
        sched.spawn_vu(&mut log).unwrap();
        sched.spawn_vu(&mut log).unwrap();
        assert_eq!(sched.active_vu_count(), 2);
        sched.cancel_all(&mut log);
        assert_eq!(sched.active_vu_count(), 0);
    }

    #[test]
    fn same_seed_same_rng_sequence() {
        let mut a = Scheduler::new(42, 1);
        let mut b = Scheduler::new(42, 1);
        for _ in 0..32 {
            assert_eq!(a.rng_mut().next_u64(), b.rng_mut().next_u64());
        }
    }
}
