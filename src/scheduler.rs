//! Two fixed-rate timers multiplexed onto one blocking wait.

use core::{
    fmt,
    ops::{BitOr, BitOrAssign},
    time::Duration,
};
use std::{thread, time::Instant};

use fugit::MillisDurationU32;

use crate::config::to_std;

/// Bitmask of timers that fired together.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Events(u8);

impl Events {
    pub const COMMAND: Events = Events(0x01);
    pub const UPDATE: Events = Events(0x02);

    pub const fn empty() -> Self {
        Events(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.contains(Events::COMMAND).then_some("COMMAND"))
            .entries(self.contains(Events::UPDATE).then_some("UPDATE"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    interval: Duration,
    next_fire: Instant,
}

impl Timer {
    fn new(interval: MillisDurationU32, start: Instant) -> Self {
        let interval = to_std(interval);
        Self {
            interval,
            next_fire: start + interval,
        }
    }

    /// Fire if due before `cutoff`. Rescheduling is relative to the previous
    /// fire time, never to the clock, so late wakeups do not accumulate.
    fn fire_before(&mut self, cutoff: Instant) -> bool {
        if self.next_fire < cutoff {
            self.next_fire += self.interval;
            true
        } else {
            false
        }
    }
}

/// Command-poll and status-update timers.
///
/// Both timers have to be non-zero for [Self::wait_next] to make progress;
/// [crate::config::Config::validate] enforces this for configured values.
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    command: Timer,
    update: Timer,
    tolerance: Duration,
}

impl IntervalScheduler {
    pub const DEFAULT_TOLERANCE: MillisDurationU32 = MillisDurationU32::millis(10);

    /// Both timers are first due one interval from now.
    pub fn new(command_interval: MillisDurationU32, update_interval: MillisDurationU32) -> Self {
        Self::starting_at(Instant::now(), command_interval, update_interval)
    }

    pub fn starting_at(
        start: Instant,
        command_interval: MillisDurationU32,
        update_interval: MillisDurationU32,
    ) -> Self {
        Self {
            command: Timer::new(command_interval, start),
            update: Timer::new(update_interval, start),
            tolerance: to_std(Self::DEFAULT_TOLERANCE),
        }
    }

    /// Window within which timers are merged into one event. At least 1 ms.
    pub fn with_tolerance(mut self, tolerance: MillisDurationU32) -> Self {
        self.tolerance = to_std(tolerance).max(Duration::from_millis(1));
        self
    }

    /// Sleep until the earlier timer is due and report every timer due by
    /// then (within the tolerance). Never returns an empty set.
    pub fn wait_next(&mut self) -> Events {
        let earliest = self.command.next_fire.min(self.update.next_fire);
        let now = Instant::now();
        if earliest > now {
            thread::sleep(earliest - now);
        }

        // Taken after the sleep, so `earliest` is always inside the window.
        let cutoff = Instant::now() + self.tolerance;
        let mut events = Events::empty();
        if self.command.fire_before(cutoff) {
            events |= Events::COMMAND;
        }
        if self.update.fire_before(cutoff) {
            events |= Events::UPDATE;
        }
        events
    }

    /// Re-seed both timers from now. Only needed after the loop was stalled
    /// long enough that catching up would be pointless.
    pub fn restart(&mut self) {
        let now = Instant::now();
        self.command.next_fire = now + self.command.interval;
        self.update.next_fire = now + self.update.interval;
    }

    /// Change the update rate. Takes effect after the next update fires.
    pub fn set_update_interval(&mut self, interval: MillisDurationU32) {
        self.update.interval = to_std(interval);
    }

    pub fn update_interval(&self) -> Duration {
        self.update.interval
    }

    pub fn command_interval(&self) -> Duration {
        self.command.interval
    }

    pub fn command_next_fire(&self) -> Instant {
        self.command.next_fire
    }

    pub fn update_next_fire(&self) -> Instant {
        self.update.next_fire
    }
}
