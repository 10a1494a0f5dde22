//! Wheel Ring Module
//!
//! The slot ring of the timing wheel. It is plain data owned by the wheel
//! actor; nothing here is shared between tasks.

use std::collections::HashMap;
use std::hash::Hash;
use std::mem;
use std::time::Duration;

type EntryId = u64;

// == Timer Entry ==
#[derive(Debug)]
struct TimerEntry<K, V> {
    key: K,
    value: V,
    /// Full revolutions left before the entry may fire
    circle: usize,
    /// Pending slot correction left by a reschedule
    diff: usize,
    /// Tombstone, the entry is dropped when its slot is next scanned
    removed: bool,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    pos: usize,
    id: EntryId,
}

// == Move Outcome ==
/// Result of rescheduling a timer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Moved<K, V> {
    /// The timer now fires after the new delay
    Rescheduled,
    /// No live timer for the key
    Unknown,
    /// The delay is shorter than one tick; the timer was retired and must run now
    RunNow(K, V),
}

enum Scan {
    Drop,
    Keep,
    Relocate(usize),
    Fire,
}

// == Ring ==
/// Circular array of slots plus the key index used for O(1) move and remove.
#[derive(Debug)]
pub(crate) struct Ring<K, V> {
    interval: Duration,
    slots: Vec<Vec<EntryId>>,
    entries: HashMap<EntryId, TimerEntry<K, V>>,
    timers: HashMap<K, Position>,
    ticked_pos: usize,
    next_id: EntryId,
}

impl<K, V> Ring<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a ring. Callers guarantee `interval > 0` and `num_slots > 0`.
    pub(crate) fn new(interval: Duration, num_slots: usize) -> Self {
        Self {
            interval,
            slots: vec![Vec::new(); num_slots],
            entries: HashMap::new(),
            timers: HashMap::new(),
            // The first tick scans slot 0.
            ticked_pos: num_slots - 1,
            next_id: 0,
        }
    }

    /// Number of live timers.
    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Whole ticks in `delay`, saturating at `usize::MAX`.
    fn steps(&self, delay: Duration) -> usize {
        usize::try_from(delay.as_nanos() / self.interval.as_nanos()).unwrap_or(usize::MAX)
    }

    fn position_and_circle(&self, delay: Duration) -> (usize, usize) {
        let steps = self.steps(delay);
        let pos = (self.ticked_pos + steps % self.num_slots()) % self.num_slots();
        let circle = steps.saturating_sub(1) / self.num_slots();
        (pos, circle)
    }

    /// Ticks until slot `pos` is scanned again, in `1..=num_slots`.
    fn ticks_until(&self, pos: usize) -> usize {
        let n = self.num_slots();
        (pos + n - self.ticked_pos - 1) % n + 1
    }

    fn push(&mut self, pos: usize, entry: TimerEntry<K, V>) {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(entry.key.clone(), Position { pos, id });
        self.entries.insert(id, entry);
        self.slots[pos].push(id);
    }

    // == Set ==
    /// Arms a timer, or replaces the value and reschedules an existing one.
    pub(crate) fn set(&mut self, key: K, value: V, delay: Duration) {
        let delay = delay.max(self.interval);

        if let Some(position) = self.timers.get(&key).copied() {
            if let Some(entry) = self.entries.get_mut(&position.id) {
                entry.value = value;
            }
            // delay >= interval, so the timer cannot be retired here
            self.move_timer(&key, delay);
            return;
        }

        let (pos, circle) = self.position_and_circle(delay);
        self.push(
            pos,
            TimerEntry {
                key,
                value,
                circle,
                diff: 0,
                removed: false,
            },
        );
    }

    // == Move ==
    /// Reschedules the timer of `key` to fire `delay` from now.
    pub(crate) fn move_timer(&mut self, key: &K, delay: Duration) -> Moved<K, V> {
        let Some(position) = self.timers.get(key).copied() else {
            return Moved::Unknown;
        };

        if delay < self.interval {
            self.timers.remove(key);
            return match self.entries.get_mut(&position.id) {
                Some(entry) => {
                    entry.removed = true;
                    Moved::RunNow(entry.key.clone(), entry.value.clone())
                }
                None => Moved::Unknown,
            };
        }

        let n = self.num_slots();
        let steps = self.steps(delay);
        let until = self.ticks_until(position.pos);
        let (pos, circle) = self.position_and_circle(delay);

        let Some(entry) = self.entries.get_mut(&position.id) else {
            return Moved::Unknown;
        };

        if steps >= until {
            // The entry is still ahead of us: keep it in place and let the
            // scan relocate it once its slot comes round.
            let extra = steps - until;
            entry.circle = extra / n;
            entry.diff = extra % n;
        } else {
            // Its slot would be reached too late; retire it and re-queue.
            entry.removed = true;
            let fresh = TimerEntry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                circle,
                diff: 0,
                removed: false,
            };
            self.push(pos, fresh);
        }

        Moved::Rescheduled
    }

    // == Remove ==
    /// Tombstones the timer of `key`; returns whether one existed.
    pub(crate) fn remove(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(position) => {
                if let Some(entry) = self.entries.get_mut(&position.id) {
                    entry.removed = true;
                }
                true
            }
            None => false,
        }
    }

    // == Tick ==
    /// Advances one slot and returns the timers that are due.
    pub(crate) fn tick(&mut self) -> Vec<(K, V)> {
        let n = self.num_slots();
        self.ticked_pos = (self.ticked_pos + 1) % n;
        let current = self.ticked_pos;

        let ids = mem::take(&mut self.slots[current]);
        let mut kept = Vec::with_capacity(ids.len());
        let mut fired = Vec::new();

        for id in ids {
            let scan = match self.entries.get_mut(&id) {
                None => continue,
                Some(entry) if entry.removed => Scan::Drop,
                Some(entry) if entry.circle > 0 => {
                    entry.circle -= 1;
                    Scan::Keep
                }
                Some(entry) if entry.diff > 0 => {
                    let pos = (current + entry.diff) % n;
                    entry.diff = 0;
                    Scan::Relocate(pos)
                }
                Some(_) => Scan::Fire,
            };

            match scan {
                Scan::Drop => {
                    self.entries.remove(&id);
                }
                Scan::Keep => kept.push(id),
                Scan::Relocate(pos) => {
                    if let Some(entry) = self.entries.get(&id) {
                        if let Some(position) = self.timers.get_mut(&entry.key) {
                            if position.id == id {
                                position.pos = pos;
                            }
                        }
                    }
                    self.slots[pos].push(id);
                }
                Scan::Fire => {
                    if let Some(entry) = self.entries.remove(&id) {
                        if self.timers.get(&entry.key).map(|p| p.id) == Some(id) {
                            self.timers.remove(&entry.key);
                        }
                        fired.push((entry.key, entry.value));
                    }
                }
            }
        }

        kept.append(&mut self.slots[current]);
        self.slots[current] = kept;
        fired
    }

    // == Drain ==
    /// Empties the ring, returning every live timer in slot order.
    pub(crate) fn drain(&mut self) -> Vec<(K, V)> {
        let mut live = Vec::new();
        for slot in self.slots.iter_mut() {
            for id in slot.drain(..) {
                if let Some(entry) = self.entries.remove(&id) {
                    if !entry.removed {
                        live.push((entry.key, entry.value));
                    }
                }
            }
        }
        self.entries.clear();
        self.timers.clear();
        live
    }
}
