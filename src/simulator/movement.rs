//! Movements: time-stamped transfers of one entity between two stocks.

use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use crate::simulator::entity::{Entity, EntityRef};
use crate::simulator::stock::{Stock, StockRef};

/// A point in simulated time, in nanoseconds since the scenario epoch.
///
/// Signed so that callers can schedule movements before the epoch (they are
/// ignored with `OccursInPast`, but they must be representable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(i64);

impl SimTime {
    /// The scenario epoch, t = 0.
    pub const ORIGIN: SimTime = SimTime(0);

    pub fn from_nanos(nanos: i64) -> Self {
        SimTime(nanos)
    }

    pub fn nanos(self) -> i64 {
        self.0
    }

    /// Nanoseconds elapsed since `earlier`. Negative if `earlier` is later.
    pub fn nanos_since(self, earlier: SimTime) -> i64 {
        self.0 - earlier.0
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0 + rhs.as_nanos() as i64)
    }
}

impl Sub<Duration> for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Duration) -> SimTime {
        SimTime(self.0 - rhs.as_nanos() as i64)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The label of a movement, e.g. `interrupt_process`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MovementKind(pub &'static str);

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Bookkeeping movement seeded at the scenario start.
pub const START_TO_RUNNING: MovementKind = MovementKind("start_to_running");
/// Bookkeeping movement seeded at the halt time.
pub const RUNNING_TO_HALTED: MovementKind = MovementKind("running_to_halted");

/// A scheduled transfer of one entity from `from` to `to` at `occurs_at`.
///
/// Notes are appended by side-effecting stock hooks while the movement is in
/// flight and end up in the trace.
pub struct Movement {
    kind: MovementKind,
    occurs_at: SimTime,
    from: StockRef,
    to: StockRef,
    notes: Vec<String>,
}

impl Movement {
    pub fn new(kind: MovementKind, occurs_at: SimTime, from: StockRef, to: StockRef) -> Self {
        Movement {
            kind,
            occurs_at,
            from,
            to,
            notes: Vec::new(),
        }
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }

    pub fn occurs_at(&self) -> SimTime {
        self.occurs_at
    }

    pub fn from(&self) -> &StockRef {
        &self.from
    }

    pub fn to(&self) -> &StockRef {
        &self.to
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub(crate) fn notes_mut(&mut self) -> &mut Vec<String> {
        &mut self.notes
    }
}

impl fmt::Debug for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Movement")
            .field("kind", &self.kind)
            .field("occurs_at", &self.occurs_at)
            .field("from", &self.from.name())
            .field("to", &self.to.name())
            .field("notes", &self.notes)
            .finish()
    }
}

/// A movement that executed, together with the entity it carried.
pub struct CompletedMovement {
    pub movement: Movement,
    pub moved: EntityRef,
}

impl fmt::Debug for CompletedMovement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedMovement")
            .field("movement", &self.movement)
            .field("moved", &self.moved.name())
            .finish()
    }
}

/// Why a movement was set aside instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OccursInPast,
    OccursAfterHalt,
    OccursSimultaneouslyWithAnotherMovement,
    FromStockIsEmpty,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IgnoreReason::OccursInPast => "OccursInPast",
            IgnoreReason::OccursAfterHalt => "OccursAfterHalt",
            IgnoreReason::OccursSimultaneouslyWithAnotherMovement => {
                "OccursSimultaneouslyWithAnotherMovement"
            }
            IgnoreReason::FromStockIsEmpty => "FromStockIsEmpty",
        };
        f.write_str(s)
    }
}

/// A movement that was set aside, with the reason.
#[derive(Debug)]
pub struct IgnoredMovement {
    pub movement: Movement,
    pub reason: IgnoreReason,
}
