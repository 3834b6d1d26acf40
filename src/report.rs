//! Plain-data run reports.
//!
//! `RunOutcome` holds live stock and entity handles and never leaves the
//! simulation thread. `RunReport` is the detached form: serializable,
//! `Send`, and everything the CLI, the HTTP surface, and the store need.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::simulator::{Entity, RunOutcome, Stock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub name: String,
    pub kind_stocked: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRecord {
    pub occurs_at: i64,
    pub kind: String,
    pub moved: Option<String>,
    pub from_stock: String,
    pub to_stock: String,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredRecord {
    pub occurs_at: i64,
    pub kind: String,
    pub from_stock: String,
    pub to_stock: String,
    pub notes: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CpuSampleRecord {
    pub cpu_utilization: f64,
    pub calculated_at: i64,
}

/// The detached result of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub ran_for: u64,
    pub traffic_pattern: String,
    pub completed: Vec<MovementRecord>,
    pub ignored: Vec<IgnoredRecord>,
    pub entities: Vec<EntityRecord>,
    pub stocks: Vec<StockRecord>,
    pub cpu_utilizations: Vec<CpuSampleRecord>,
    /// Present when the run stopped on a fatal error. Traces are partial.
    pub error: Option<String>,
}

impl RunReport {
    pub fn from_outcome(traffic_pattern: &str, ran_for: u64, outcome: RunOutcome) -> Self {
        let mut entities: BTreeMap<String, String> = BTreeMap::new();
        let mut stocks: BTreeMap<String, String> = BTreeMap::new();

        let mut note_stock = |stock: &crate::simulator::StockRef| {
            stocks
                .entry(stock.name().as_str().to_string())
                .or_insert_with(|| stock.kind_stocked().as_str().to_string());
        };

        let completed = outcome
            .completed
            .iter()
            .map(|c| {
                note_stock(c.movement.from());
                note_stock(c.movement.to());
                entities
                    .entry(c.moved.name().as_str().to_string())
                    .or_insert_with(|| c.moved.kind().as_str().to_string());
                MovementRecord {
                    occurs_at: c.movement.occurs_at().nanos(),
                    kind: c.movement.kind().as_str().to_string(),
                    moved: Some(c.moved.name().as_str().to_string()),
                    from_stock: c.movement.from().name().as_str().to_string(),
                    to_stock: c.movement.to().name().as_str().to_string(),
                    notes: c.movement.notes().to_vec(),
                }
            })
            .collect();

        let ignored = outcome
            .ignored
            .iter()
            .map(|i| {
                note_stock(i.movement.from());
                note_stock(i.movement.to());
                IgnoredRecord {
                    occurs_at: i.movement.occurs_at().nanos(),
                    kind: i.movement.kind().as_str().to_string(),
                    from_stock: i.movement.from().name().as_str().to_string(),
                    to_stock: i.movement.to().name().as_str().to_string(),
                    notes: i.movement.notes().to_vec(),
                    reason: i.reason.to_string(),
                }
            })
            .collect();

        RunReport {
            ran_for,
            traffic_pattern: traffic_pattern.to_string(),
            completed,
            ignored,
            entities: entities
                .into_iter()
                .map(|(name, kind)| EntityRecord { name, kind })
                .collect(),
            stocks: stocks
                .into_iter()
                .map(|(name, kind_stocked)| StockRecord { name, kind_stocked })
                .collect(),
            cpu_utilizations: outcome
                .cpu_utilizations
                .iter()
                .map(|s| CpuSampleRecord {
                    cpu_utilization: s.cpu_utilization,
                    calculated_at: s.calculated_at.nanos(),
                })
                .collect(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        }
    }
}
