//! SQLite persistence for run traces and the derived metric queries.
//!
//! Each run gets stored into `scenario_runs` plus child tables for
//! entities, stocks, the two movement traces, and CPU samples. The derived
//! metrics (running tallies, response times, requests per second) are plain
//! SQL over the completed trace.

use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::report::RunReport;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Running entity tally of one stock at one point in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyLine {
    pub occurs_at: i64,
    pub stock_name: String,
    pub kind_stocked: String,
    pub tally: i64,
}

/// Arrival-to-completion timing of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTime {
    pub arrived_at: i64,
    pub completed_at: i64,
    pub response_time: i64,
}

/// Completed requests bucketed per simulated second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestsPerSecond {
    pub second: i64,
    pub requests: i64,
}

/// One stored CPU-utilization sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuUtilizationMetric {
    pub cpu_utilization: f64,
    pub calculated_at: i64,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scenario_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ran_for INTEGER NOT NULL,
        traffic_pattern TEXT NOT NULL,
        recorded_error TEXT
    )",
    "CREATE TABLE IF NOT EXISTS entities (
        scenario_run_id INTEGER NOT NULL REFERENCES scenario_runs(id),
        name TEXT NOT NULL,
        kind TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS stocks (
        scenario_run_id INTEGER NOT NULL REFERENCES scenario_runs(id),
        name TEXT NOT NULL,
        kind_stocked TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS completed_movements (
        scenario_run_id INTEGER NOT NULL REFERENCES scenario_runs(id),
        occurs_at INTEGER NOT NULL,
        kind TEXT NOT NULL,
        moved TEXT,
        from_stock TEXT NOT NULL,
        to_stock TEXT NOT NULL,
        notes TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ignored_movements (
        scenario_run_id INTEGER NOT NULL REFERENCES scenario_runs(id),
        occurs_at INTEGER NOT NULL,
        kind TEXT NOT NULL,
        from_stock TEXT NOT NULL,
        to_stock TEXT NOT NULL,
        notes TEXT NOT NULL,
        reason TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS cpu_utilizations (
        scenario_run_id INTEGER NOT NULL REFERENCES scenario_runs(id),
        calculated_at INTEGER NOT NULL,
        cpu_utilization REAL NOT NULL
    )",
];

/// A handle to one results database.
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    /// Open an in-memory database and create the schema. The pool is pinned
    /// to a single connection: SQLite in-memory databases live and die with
    /// their connection.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = RunStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Persist a full run report. Returns the new scenario-run id.
    pub async fn store_run(&self, report: &RunReport) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let run_id = sqlx::query(
            "INSERT INTO scenario_runs (ran_for, traffic_pattern, recorded_error)
             VALUES (?, ?, ?)",
        )
        .bind(report.ran_for as i64)
        .bind(&report.traffic_pattern)
        .bind(&report.error)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for entity in &report.entities {
            sqlx::query("INSERT INTO entities (scenario_run_id, name, kind) VALUES (?, ?, ?)")
                .bind(run_id)
                .bind(&entity.name)
                .bind(&entity.kind)
                .execute(&mut *tx)
                .await?;
        }

        for stock in &report.stocks {
            sqlx::query(
                "INSERT INTO stocks (scenario_run_id, name, kind_stocked) VALUES (?, ?, ?)",
            )
            .bind(run_id)
            .bind(&stock.name)
            .bind(&stock.kind_stocked)
            .execute(&mut *tx)
            .await?;
        }

        for movement in &report.completed {
            sqlx::query(
                "INSERT INTO completed_movements
                 (scenario_run_id, occurs_at, kind, moved, from_stock, to_stock, notes)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(movement.occurs_at)
            .bind(&movement.kind)
            .bind(&movement.moved)
            .bind(&movement.from_stock)
            .bind(&movement.to_stock)
            .bind(movement.notes.join("\n"))
            .execute(&mut *tx)
            .await?;
        }

        for movement in &report.ignored {
            sqlx::query(
                "INSERT INTO ignored_movements
                 (scenario_run_id, occurs_at, kind, from_stock, to_stock, notes, reason)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(movement.occurs_at)
            .bind(&movement.kind)
            .bind(&movement.from_stock)
            .bind(&movement.to_stock)
            .bind(movement.notes.join("\n"))
            .bind(&movement.reason)
            .execute(&mut *tx)
            .await?;
        }

        for sample in &report.cpu_utilizations {
            sqlx::query(
                "INSERT INTO cpu_utilizations (scenario_run_id, calculated_at, cpu_utilization)
                 VALUES (?, ?, ?)",
            )
            .bind(run_id)
            .bind(sample.calculated_at)
            .bind(sample.cpu_utilization)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(run_id)
    }

    /// Running per-stock entity tallies over the completed trace.
    pub async fn tally_lines(&self, run_id: i64) -> Result<Vec<TallyLine>, StoreError> {
        let rows = sqlx::query(
            "WITH deltas AS (
                 SELECT occurs_at, to_stock AS stock_name, 1 AS delta
                   FROM completed_movements WHERE scenario_run_id = ?
                 UNION ALL
                 SELECT occurs_at, from_stock AS stock_name, -1 AS delta
                   FROM completed_movements WHERE scenario_run_id = ?
             )
             SELECT d.occurs_at AS occurs_at,
                    d.stock_name AS stock_name,
                    COALESCE(s.kind_stocked, '') AS kind_stocked,
                    SUM(d.delta) OVER (
                        PARTITION BY d.stock_name ORDER BY d.occurs_at, d.delta
                    ) AS tally
               FROM deltas d
               LEFT JOIN stocks s ON s.scenario_run_id = ? AND s.name = d.stock_name
              ORDER BY d.occurs_at, d.stock_name",
        )
        .bind(run_id)
        .bind(run_id)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| TallyLine {
                occurs_at: row.get("occurs_at"),
                stock_name: row.get("stock_name"),
                kind_stocked: row.get("kind_stocked"),
                tally: row.get("tally"),
            })
            .collect())
    }

    /// Arrival-to-completion latency per request that finished.
    pub async fn response_times(&self, run_id: i64) -> Result<Vec<ResponseTime>, StoreError> {
        let rows = sqlx::query(
            "SELECT a.occurs_at AS arrived_at,
                    c.occurs_at AS completed_at,
                    c.occurs_at - a.occurs_at AS response_time
               FROM completed_movements a
               JOIN completed_movements c
                 ON c.scenario_run_id = a.scenario_run_id
                AND c.moved = a.moved
                AND c.kind = 'complete_request'
              WHERE a.scenario_run_id = ?
                AND a.kind = 'arrive_at_routing_stock'
              ORDER BY a.occurs_at",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ResponseTime {
                arrived_at: row.get("arrived_at"),
                completed_at: row.get("completed_at"),
                response_time: row.get("response_time"),
            })
            .collect())
    }

    /// Completions bucketed per simulated second.
    pub async fn requests_per_second(
        &self,
        run_id: i64,
    ) -> Result<Vec<RequestsPerSecond>, StoreError> {
        let rows = sqlx::query(
            "SELECT occurs_at / 1000000000 AS second, COUNT(*) AS requests
               FROM completed_movements
              WHERE scenario_run_id = ? AND kind = 'complete_request'
              GROUP BY second
              ORDER BY second",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RequestsPerSecond {
                second: row.get("second"),
                requests: row.get("requests"),
            })
            .collect())
    }

    /// Stored CPU-utilization samples in tick order.
    pub async fn cpu_utilizations(
        &self,
        run_id: i64,
    ) -> Result<Vec<CpuUtilizationMetric>, StoreError> {
        let rows = sqlx::query(
            "SELECT cpu_utilization, calculated_at
               FROM cpu_utilizations
              WHERE scenario_run_id = ?
              ORDER BY calculated_at",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CpuUtilizationMetric {
                cpu_utilization: row.get("cpu_utilization"),
                calculated_at: row.get("calculated_at"),
            })
            .collect())
    }
}
