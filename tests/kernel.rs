//! Kernel end-to-end scenarios: the driver loop, the schedule, and the
//! ignored-movement taxonomy.

use std::rc::Rc;
use std::time::Duration;

use scalesim::policy::FixedPolicy;
use scalesim::simulator::{
    Dequeued, Entity, Environment, IgnoreReason, KIND_SCENARIO, Movement, MovementKind,
    MovementQueue, SimTime, Stock, StockRef, ThroughStock,
};

fn environment(duration: Duration) -> Environment {
    Environment::new(SimTime::ORIGIN, duration, Box::new(FixedPolicy::new(0)))
}

#[test]
fn empty_scenario_produces_exactly_the_bookkeeping_trace() {
    let outcome = environment(Duration::from_secs(1)).run();

    assert!(outcome.error.is_none());
    assert!(outcome.ignored.is_empty());
    assert_eq!(outcome.completed.len(), 2);

    let start = &outcome.completed[0];
    assert_eq!(start.movement.kind().as_str(), "start_to_running");
    assert_eq!(start.movement.occurs_at().nanos(), 0);
    assert_eq!(start.movement.from().name().as_str(), "BeforeScenario");
    assert_eq!(start.movement.to().name().as_str(), "RunningScenario");
    assert_eq!(start.moved.name().as_str(), "Scenario");

    let halt = &outcome.completed[1];
    assert_eq!(halt.movement.kind().as_str(), "running_to_halted");
    assert_eq!(halt.movement.occurs_at().nanos(), 1_000_000_000);
    assert_eq!(halt.movement.to().name().as_str(), "HaltedScenario");
}

#[test]
fn movement_in_the_past_is_ignored_and_bookkeeping_still_completes() {
    let mut env = environment(Duration::from_secs(1));
    env.add_to_schedule(Movement::new(
        MovementKind("premature"),
        SimTime::ORIGIN - Duration::from_nanos(1),
        env.running_scenario(),
        env.running_scenario(),
    ));

    let outcome = env.run();
    assert_eq!(outcome.completed.len(), 2);
    assert_eq!(outcome.ignored.len(), 1);
    assert_eq!(outcome.ignored[0].reason, IgnoreReason::OccursInPast);
    assert_eq!(outcome.ignored[0].movement.kind().as_str(), "premature");
}

#[test]
fn movement_after_halt_is_ignored_with_the_right_reason() {
    let mut env = environment(Duration::from_secs(10));
    env.add_to_schedule(Movement::new(
        MovementKind("beyond_the_end"),
        SimTime::ORIGIN + Duration::from_secs(20),
        env.running_scenario(),
        env.running_scenario(),
    ));

    let outcome = env.run();
    assert_eq!(outcome.ignored.len(), 1);
    assert_eq!(outcome.ignored[0].reason, IgnoreReason::OccursAfterHalt);
}

#[test]
fn second_movement_on_the_same_nanosecond_is_rejected() {
    let mut env = environment(Duration::from_secs(1));
    let at = SimTime::ORIGIN + Duration::from_millis(500);
    let holding: StockRef = Rc::new(ThroughStock::new("Holding", KIND_SCENARIO));

    assert!(env.add_to_schedule(Movement::new(
        MovementKind("winner"),
        at,
        env.running_scenario(),
        Rc::clone(&holding),
    )));
    assert!(!env.add_to_schedule(Movement::new(
        MovementKind("loser"),
        at,
        env.running_scenario(),
        holding,
    )));

    let outcome = env.run();
    let completed_kinds: Vec<&str> = outcome
        .completed
        .iter()
        .map(|c| c.movement.kind().as_str())
        .collect();
    assert!(completed_kinds.contains(&"winner"));
    assert!(!completed_kinds.contains(&"loser"));
    assert_eq!(outcome.ignored.len(), 1);
    assert_eq!(
        outcome.ignored[0].reason,
        IgnoreReason::OccursSimultaneouslyWithAnotherMovement
    );
}

#[test]
fn completed_trace_is_strictly_monotonic_and_halt_bounded() {
    let mut env = environment(Duration::from_secs(2));
    let holding: StockRef = Rc::new(ThroughStock::new("Holding", KIND_SCENARIO));

    // A little shuffle traffic in arbitrary insertion order.
    for (kind, millis) in [
        ("hop_out", 700u64),
        ("hop_back", 900),
        ("hop_out_again", 1100),
        ("hop_back_again", 1600),
    ] {
        let (from, to): (StockRef, StockRef) = if kind.starts_with("hop_out") {
            (env.running_scenario(), Rc::clone(&holding))
        } else {
            (Rc::clone(&holding), env.running_scenario())
        };
        env.add_to_schedule(Movement::new(
            MovementKind(kind),
            SimTime::ORIGIN + Duration::from_millis(millis),
            from,
            to,
        ));
    }

    let outcome = env.run();
    assert!(outcome.error.is_none());
    for pair in outcome.completed.windows(2) {
        assert!(
            pair[0].movement.occurs_at() < pair[1].movement.occurs_at(),
            "trace must be strictly increasing"
        );
    }
    let halt = SimTime::ORIGIN + Duration::from_secs(2);
    assert!(outcome.completed.iter().all(|c| c.movement.occurs_at() <= halt));
}

#[test]
fn conservation_one_entity_leaves_from_and_enters_to() {
    let mut env = environment(Duration::from_secs(1));
    let holding = Rc::new(ThroughStock::new("Holding", KIND_SCENARIO));

    env.add_to_schedule(Movement::new(
        MovementKind("hop_out"),
        SimTime::ORIGIN + Duration::from_millis(100),
        env.running_scenario(),
        Rc::clone(&holding) as StockRef,
    ));

    let running = env.running_scenario();
    assert_eq!(running.count() + holding.count(), 0);

    let outcome = env.run();
    assert!(outcome.error.is_none());
    // The scenario entity ends in Holding; running_to_halted found its
    // source empty and was ignored.
    assert_eq!(holding.count(), 1);
    assert_eq!(running.count(), 0);
    assert!(
        outcome
            .ignored
            .iter()
            .any(|i| i.reason == IgnoreReason::FromStockIsEmpty)
    );
}

#[test]
fn dequeued_movements_leave_no_trace() {
    let mut queue = MovementQueue::new();
    let holding: StockRef = Rc::new(ThroughStock::new("Holding", KIND_SCENARIO));
    queue
        .enqueue(Movement::new(
            MovementKind("never_run"),
            SimTime::ORIGIN + Duration::from_millis(1),
            Rc::clone(&holding),
            holding,
        ))
        .unwrap();

    let Dequeued::Next(movement) = queue.dequeue() else {
        panic!("expected the pending movement");
    };
    assert_eq!(movement.kind().as_str(), "never_run");
    assert!(queue.is_empty());
    assert!(matches!(queue.dequeue(), Dequeued::Empty));
}

#[test]
fn queue_closes_idempotently_and_stays_closed() {
    let mut queue = MovementQueue::new();
    assert!(!queue.is_closed());
    queue.close();
    queue.close();
    assert!(queue.is_closed());
    assert!(matches!(queue.dequeue(), Dequeued::Closed));
}
