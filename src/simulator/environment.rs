//! The environment: simulated clock, movement schedule, and the driver loop.
//!
//! Everything in a scenario is serialized through `run()`: it pops the
//! earliest movement, removes the entity from the source stock, adds it to
//! the destination stock, and repeats until the queue drains or the halt
//! time passes. Stock hooks run inside the loop and receive a [`SimContext`]
//! through which they read the clock, append notes, schedule follow-on
//! movements, and talk to the scaling policy.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::policy::ScalingPolicy;
use crate::simulator::entity::{BaseEntity, KIND_SCENARIO};
use crate::simulator::movement::{
    CompletedMovement, IgnoreReason, IgnoredMovement, Movement, MovementKind, SimTime,
    RUNNING_TO_HALTED, START_TO_RUNNING,
};
use crate::simulator::queue::{Dequeued, MovementQueue};
use crate::simulator::stock::{SinkStock, Stock, StockError, StockRef, ThroughStock};

/// One averaged CPU-utilization sample, in percent, taken at a tick.
#[derive(Debug, Clone, Copy)]
pub struct CpuUtilization {
    pub cpu_utilization: f64,
    pub calculated_at: SimTime,
}

/// A fatal error that stopped the driver loop.
#[derive(Debug, thiserror::Error)]
#[error("movement {kind} at {at} failed: {source}")]
pub struct SimulationError {
    pub kind: MovementKind,
    pub at: SimTime,
    #[source]
    pub source: StockError,
}

/// Everything `run()` produces. Partial traces are returned even when the
/// loop stopped on a fatal error.
pub struct RunOutcome {
    pub completed: Vec<CompletedMovement>,
    pub ignored: Vec<IgnoredMovement>,
    pub cpu_utilizations: Vec<CpuUtilization>,
    pub error: Option<SimulationError>,
}

/// The handle stock hooks receive while a movement executes.
pub struct SimContext<'a> {
    now: SimTime,
    halt: SimTime,
    queue: &'a mut MovementQueue,
    ignored: &'a mut Vec<IgnoredMovement>,
    cpu_utilizations: &'a mut Vec<CpuUtilization>,
    policy: &'a mut dyn ScalingPolicy,
    notes: &'a mut Vec<String>,
}

impl SimContext<'_> {
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn halt_time(&self) -> SimTime {
        self.halt
    }

    /// Append a diagnostic note to the in-flight movement.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    /// The scaling policy, an opaque oracle owned by the environment.
    pub fn policy(&mut self) -> &mut dyn ScalingPolicy {
        &mut *self.policy
    }

    /// Record an averaged CPU-utilization sample at the current time.
    pub fn record_cpu_utilization(&mut self, percent: f64) {
        self.cpu_utilizations.push(CpuUtilization {
            cpu_utilization: percent,
            calculated_at: self.now,
        });
    }

    /// Strict scheduling: rejects (and records as ignored) movements in the
    /// past, past the halt time, or on an occupied nanosecond.
    pub fn schedule(&mut self, movement: Movement) -> bool {
        try_schedule(self.queue, self.ignored, self.now, self.halt, movement)
    }

    /// Schedule a follow-on movement on the first free nanosecond at or
    /// after `now + delay` (at least `now + 1ns`). Probing forward keeps
    /// timestamps unique without dropping cascaded movements. Returns false
    /// (recorded as ignored) when the first free nanosecond falls after the
    /// halt time.
    pub fn schedule_after(
        &mut self,
        kind: MovementKind,
        delay: Duration,
        from: StockRef,
        to: StockRef,
    ) -> bool {
        let mut at = self.now + delay.max(Duration::from_nanos(1));
        while self.queue.contains(at) {
            at = at + Duration::from_nanos(1);
        }
        let movement = Movement::new(kind, at, from, to);
        if at > self.halt {
            trace!(kind = %kind, at = %at, "follow-on movement falls after halt");
            self.ignored.push(IgnoredMovement {
                movement,
                reason: IgnoreReason::OccursAfterHalt,
            });
            return false;
        }
        match self.queue.enqueue(movement) {
            Ok(()) => true,
            Err(err) => {
                self.ignored.push(IgnoredMovement {
                    movement: err.movement,
                    reason: IgnoreReason::OccursSimultaneouslyWithAnotherMovement,
                });
                false
            }
        }
    }
}

fn try_schedule(
    queue: &mut MovementQueue,
    ignored: &mut Vec<IgnoredMovement>,
    now: SimTime,
    halt: SimTime,
    movement: Movement,
) -> bool {
    if movement.occurs_at() < now {
        ignored.push(IgnoredMovement {
            movement,
            reason: IgnoreReason::OccursInPast,
        });
        return false;
    }
    if movement.occurs_at() > halt {
        ignored.push(IgnoredMovement {
            movement,
            reason: IgnoreReason::OccursAfterHalt,
        });
        return false;
    }
    match queue.enqueue(movement) {
        Ok(()) => true,
        Err(err) => {
            ignored.push(IgnoredMovement {
                movement: err.movement,
                reason: IgnoreReason::OccursSimultaneouslyWithAnotherMovement,
            });
            false
        }
    }
}

/// Owns the clock, the schedule, the traces, and the policy for one run.
pub struct Environment {
    start_at: SimTime,
    halt_at: SimTime,
    current: SimTime,
    queue: MovementQueue,
    completed: Vec<CompletedMovement>,
    ignored: Vec<IgnoredMovement>,
    cpu_utilizations: Vec<CpuUtilization>,
    policy: Box<dyn ScalingPolicy>,
    running_scenario: Rc<ThroughStock>,
}

impl Environment {
    /// Create an environment spanning `[start_at, start_at + duration]` and
    /// seed the scenario bookkeeping movements, so every trace has
    /// well-defined initial and terminal markers.
    pub fn new(start_at: SimTime, duration: Duration, policy: Box<dyn ScalingPolicy>) -> Self {
        let halt_at = start_at + duration;

        let before = Rc::new(ThroughStock::new("BeforeScenario", KIND_SCENARIO));
        let running = Rc::new(ThroughStock::new("RunningScenario", KIND_SCENARIO));
        let halted = Rc::new(SinkStock::new("HaltedScenario", KIND_SCENARIO));

        // push cannot fail here: the entity kind matches by construction
        let _ = before.push(BaseEntity::new("Scenario", KIND_SCENARIO));

        let mut queue = MovementQueue::new();
        let mut ignored = Vec::new();
        try_schedule(
            &mut queue,
            &mut ignored,
            start_at,
            halt_at,
            Movement::new(
                START_TO_RUNNING,
                start_at,
                before as StockRef,
                Rc::clone(&running) as StockRef,
            ),
        );
        try_schedule(
            &mut queue,
            &mut ignored,
            start_at,
            halt_at,
            Movement::new(
                RUNNING_TO_HALTED,
                halt_at,
                Rc::clone(&running) as StockRef,
                halted as StockRef,
            ),
        );

        Environment {
            start_at,
            halt_at,
            current: start_at,
            queue,
            completed: Vec::new(),
            ignored,
            cpu_utilizations: Vec::new(),
            policy,
            running_scenario: running,
        }
    }

    pub fn start_at(&self) -> SimTime {
        self.start_at
    }

    pub fn halt_time(&self) -> SimTime {
        self.halt_at
    }

    pub fn current_movement_time(&self) -> SimTime {
        self.current
    }

    pub fn policy(&self) -> &dyn ScalingPolicy {
        &*self.policy
    }

    pub fn policy_mut(&mut self) -> &mut dyn ScalingPolicy {
        &mut *self.policy
    }

    pub fn append_cpu_utilization(&mut self, sample: CpuUtilization) {
        self.cpu_utilizations.push(sample);
    }

    pub fn cpu_utilizations(&self) -> &[CpuUtilization] {
        &self.cpu_utilizations
    }

    /// Number of movements waiting to execute.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Whether the given nanosecond is already taken by a movement.
    pub fn time_occupied(&self, at: SimTime) -> bool {
        self.queue.contains(at)
    }

    /// Caller-initiated cancellation: close the schedule so `run()` stops
    /// before executing anything further.
    pub fn close(&mut self) {
        self.queue.close();
    }

    /// Iterate over pending movements in no particular order.
    pub fn pending_movements(&self) -> impl Iterator<Item = &Movement> {
        self.queue.iter()
    }

    /// Strict scheduling for movements enqueued from outside the loop:
    /// traffic arrivals, autoscaler ticks, tests. Returns false (and records
    /// the movement as ignored) on past, after-halt, or occupied times.
    pub fn add_to_schedule(&mut self, movement: Movement) -> bool {
        try_schedule(
            &mut self.queue,
            &mut self.ignored,
            self.current,
            self.halt_at,
            movement,
        )
    }

    /// Run `f` with a scheduling context at the current movement time.
    /// Model constructors use this to pre-load stocks; tests use it to drive
    /// stock hooks directly. Notes written here go nowhere: there is no
    /// in-flight movement.
    pub fn with_context<R>(&mut self, f: impl FnOnce(&mut SimContext<'_>) -> R) -> R {
        let mut notes = Vec::new();
        let mut ctx = SimContext {
            now: self.current,
            halt: self.halt_at,
            queue: &mut self.queue,
            ignored: &mut self.ignored,
            cpu_utilizations: &mut self.cpu_utilizations,
            policy: &mut *self.policy,
            notes: &mut notes,
        };
        f(&mut ctx)
    }

    /// Drive the scenario to completion. Consumes the environment: when this
    /// returns, the run is over and the traces are final.
    pub fn run(mut self) -> RunOutcome {
        debug!(start = %self.start_at, halt = %self.halt_at, "starting simulation");

        let halt = self.halt_at;
        let mut error = None;

        loop {
            let mut movement = match self.queue.dequeue() {
                Dequeued::Next(movement) => movement,
                Dequeued::Empty | Dequeued::Closed => {
                    self.queue.close();
                    break;
                }
            };

            if movement.occurs_at() > halt {
                self.ignored.push(IgnoredMovement {
                    movement,
                    reason: IgnoreReason::OccursAfterHalt,
                });
                self.queue.close();
                break;
            }

            if movement.occurs_at() < self.current {
                self.ignored.push(IgnoredMovement {
                    movement,
                    reason: IgnoreReason::OccursInPast,
                });
                continue;
            }

            self.current = movement.occurs_at();
            trace!(kind = %movement.kind(), at = %self.current, "executing movement");

            let from = Rc::clone(movement.from());
            let to = Rc::clone(movement.to());

            let removed = {
                let mut ctx = SimContext {
                    now: self.current,
                    halt,
                    queue: &mut self.queue,
                    ignored: &mut self.ignored,
                    cpu_utilizations: &mut self.cpu_utilizations,
                    policy: &mut *self.policy,
                    notes: movement.notes_mut(),
                };
                from.remove(&mut ctx)
            };

            let Some(entity) = removed else {
                self.ignored.push(IgnoredMovement {
                    movement,
                    reason: IgnoreReason::FromStockIsEmpty,
                });
                continue;
            };

            let added = {
                let mut ctx = SimContext {
                    now: self.current,
                    halt,
                    queue: &mut self.queue,
                    ignored: &mut self.ignored,
                    cpu_utilizations: &mut self.cpu_utilizations,
                    policy: &mut *self.policy,
                    notes: movement.notes_mut(),
                };
                to.add(Rc::clone(&entity), &mut ctx)
            };

            match added {
                Ok(()) => self.completed.push(CompletedMovement {
                    movement,
                    moved: entity,
                }),
                Err(source) => {
                    error = Some(SimulationError {
                        kind: movement.kind(),
                        at: movement.occurs_at(),
                        source,
                    });
                    self.queue.close();
                    break;
                }
            }
        }

        debug!(
            completed = self.completed.len(),
            ignored = self.ignored.len(),
            fatal = error.is_some(),
            "simulation finished"
        );

        RunOutcome {
            completed: self.completed,
            ignored: self.ignored,
            cpu_utilizations: self.cpu_utilizations,
            error,
        }
    }

    /// The `RunningScenario` stock, exposed so tests can target the
    /// bookkeeping lane.
    pub fn running_scenario(&self) -> Rc<ThroughStock> {
        Rc::clone(&self.running_scenario)
    }
}
