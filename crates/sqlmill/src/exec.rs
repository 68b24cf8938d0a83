//! Execution interface for compiled statements.
//!
//! sqlmill never talks to a database itself. Drivers implement [`Executor`]
//! (blocking) or [`AsyncExecutor`] and the helpers here run multi-step plans
//! strictly in order, stopping at the first failure. Transaction boundaries
//! belong to the caller: run the steps on a transaction and roll it back when
//! a helper returns an error.

use crate::batch::SelectPlan;
use crate::error::{SqlError, SqlResult};
use crate::registry::truncate_sql_bytes;
use crate::statement::CompiledStatement;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A result row, keyed by column label.
pub type Row = Map<String, Value>;

/// What a write statement reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub affected_rows: u64,
    /// Last generated key, when the driver reports one.
    pub insert_id: Option<Value>,
}

impl ExecOutcome {
    /// Outcome of a write that touched `affected_rows` rows.
    pub fn new(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            insert_id: None,
        }
    }

    /// Attach the generated key reported by the driver.
    pub fn with_insert_id(mut self, id: impl Into<Value>) -> Self {
        self.insert_id = Some(id.into());
        self
    }
}

/// A blocking statement runner.
pub trait Executor {
    /// Execute a statement that returns no rows.
    fn run(&self, statement: &CompiledStatement) -> SqlResult<ExecOutcome>;

    /// Execute a statement and collect its rows.
    fn query(&self, statement: &CompiledStatement) -> SqlResult<Vec<Row>>;
}

/// An async statement runner.
#[async_trait]
pub trait AsyncExecutor: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn run(&self, statement: &CompiledStatement) -> SqlResult<ExecOutcome>;

    /// Execute a statement and collect its rows.
    async fn query(&self, statement: &CompiledStatement) -> SqlResult<Vec<Row>>;
}

const LOG_STEP_LEN: usize = 256;

fn log_failure(index: usize, statement: &CompiledStatement, err: &SqlError) {
    tracing::warn!(
        target: "sqlmill.exec",
        step = index,
        sql = truncate_sql_bytes(&statement.sql, LOG_STEP_LEN),
        error = %err,
        "plan step failed"
    );
}

/// Run every step in order; the first error aborts the rest.
pub fn run_steps<E>(executor: &E, steps: &[CompiledStatement]) -> SqlResult<Vec<ExecOutcome>>
where
    E: Executor + ?Sized,
{
    let mut outcomes = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        match executor.run(step) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                log_failure(i, step, &err);
                return Err(err);
            }
        }
    }
    Ok(outcomes)
}

/// Async counterpart of [`run_steps`].
pub async fn run_steps_async<E>(
    executor: &E,
    steps: &[CompiledStatement],
) -> SqlResult<Vec<ExecOutcome>>
where
    E: AsyncExecutor + ?Sized,
{
    let mut outcomes = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        match executor.run(step).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                log_failure(i, step, &err);
                return Err(err);
            }
        }
    }
    Ok(outcomes)
}

/// Run a select plan: setup and teardown steps with `run`, the query step with `query`.
pub fn query_plan<E>(executor: &E, plan: &SelectPlan) -> SqlResult<Vec<Row>>
where
    E: Executor + ?Sized,
{
    let mut rows = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let result = if i == plan.query_step {
            executor.query(step).map(|r| rows = r)
        } else {
            executor.run(step).map(drop)
        };
        if let Err(err) = result {
            log_failure(i, step, &err);
            return Err(err);
        }
    }
    Ok(rows)
}

/// Async counterpart of [`query_plan`].
pub async fn query_plan_async<E>(executor: &E, plan: &SelectPlan) -> SqlResult<Vec<Row>>
where
    E: AsyncExecutor + ?Sized,
{
    let mut rows = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let result = if i == plan.query_step {
            executor.query(step).await.map(|r| rows = r)
        } else {
            executor.run(step).await.map(drop)
        };
        if let Err(err) = result {
            log_failure(i, step, &err);
            return Err(err);
        }
    }
    Ok(rows)
}
