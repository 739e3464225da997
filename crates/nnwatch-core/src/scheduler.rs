// Named deadlines for the engine loop.
//
// Every timer the engine needs (poll tick, health tick, reconnect backoff,
// connect timeout, persistence debounce) is one slot here. Scheduling a
// kind replaces its previous deadline and bumps its generation, so a handle
// taken before the reschedule can no longer cancel the new deadline.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    PollTick,
    HealthTick,
    Reconnect,
    ConnectTimeout,
    PersistFlush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    deadline: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    slots: HashMap<TimerKind, Slot>,
    generation: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, kind: TimerKind, deadline: Instant) -> TimerHandle {
        self.generation += 1;
        self.slots.insert(
            kind,
            Slot {
                deadline,
                generation: self.generation,
            },
        );
        TimerHandle {
            kind,
            generation: self.generation,
        }
    }

    pub fn schedule(&mut self, kind: TimerKind, now: Instant, after: Duration) -> TimerHandle {
        self.schedule_at(kind, now + after)
    }

    /// Cancel the deadline the handle refers to. A stale handle is ignored.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.slots.get(&handle.kind) {
            Some(slot) if slot.generation == handle.generation => {
                self.slots.remove(&handle.kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_kind(&mut self, kind: TimerKind) -> bool {
        self.slots.remove(&kind).is_some()
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.slots.get(&kind).map(|s| s.deadline)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|s| s.deadline).min()
    }

    /// Remove and return every kind due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<(Instant, TimerKind)> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.deadline <= now)
            .map(|(kind, slot)| (slot.deadline, *kind))
            .collect();
        due.sort();
        for (_, kind) in &due {
            self.slots.remove(kind);
        }
        due.into_iter().map(|(_, kind)| kind).collect()
    }
}
