//! Cooperative timers on the fixed update loop.
//!
//! Timers are one-shot and measured in simulated seconds. Every timer
//! belongs to a task group; cancelling the group cancels whatever is still
//! pending in it. Repeating timers are rescheduled by whoever handles the
//! event. A timer never comes due on the tick it was scheduled in, so a
//! zero-delay repeat fires once per tick.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskGroup(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Timers due within this much of "now" fire on the current tick
const DUE_EPSILON: f64 = 1e-9;

struct Timer<E> {
    id: TimerId,
    group: TaskGroup,
    due: f64,
    armed_tick: u64,
    event: E,
}

pub struct Scheduler<E> {
    now: f64,
    ticks: u64,
    next_timer: u64,
    next_group: u64,
    timers: Vec<Timer<E>>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            ticks: 0,
            next_timer: 0,
            next_group: 0,
            timers: Vec::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn new_group(&mut self) -> TaskGroup {
        let group = TaskGroup(self.next_group);
        self.next_group += 1;
        group
    }

    pub fn schedule(&mut self, group: TaskGroup, delay: f64, event: E) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.push(Timer {
            id,
            group,
            due: self.now + delay.max(0.0),
            armed_tick: self.ticks,
            event,
        });
        id
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        self.timers.len() != before
    }

    /// Cancel everything pending in `group`; returns how many were dropped
    pub fn cancel_group(&mut self, group: TaskGroup) -> usize {
        let before = self.timers.len();
        self.timers.retain(|t| t.group != group);
        before - self.timers.len()
    }

    pub fn pending(&self, group: TaskGroup) -> usize {
        self.timers.iter().filter(|t| t.group == group).count()
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn advance(&mut self, dt: f64) {
        self.now += dt;
        self.ticks += 1;
    }

    /// Next due event, earliest first (ties in scheduling order).
    /// Call repeatedly after `advance`; handlers may cancel or schedule in between.
    /// Anything scheduled since the last `advance` waits for the next one.
    pub fn pop_due(&mut self) -> Option<E> {
        let limit = self.now + DUE_EPSILON;
        let ticks = self.ticks;
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= limit && t.armed_tick < ticks)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.0.cmp(&b.id.0)))
            .map(|(i, _)| i)?;
        Some(self.timers.swap_remove(idx).event)
    }
}
