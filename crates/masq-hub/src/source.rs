//! # Row sources
//!
//! The port between the pipeline and the export target. Readers only ever
//! see `fetch_page`: one bounded window of the planned query, rendered to
//! string cells. The production implementation talks PostgreSQL through
//! tokio-postgres with one connection (and one prepared statement) per
//! reader worker; the pipeline tests plug in an in-memory source instead.

use crate::error::ExportError;
use async_trait::async_trait;
use masq_core::descriptor::ConnSpec;
use masq_core::plan::QueryPlan;
use masq_core::Row;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_postgres::{Client, NoTls, Statement};

/// A paged window over the planned result set.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<Row>, ExportError>;
}

struct PgWorker {
    client: Client,
    paged: Statement,
}

/// PostgreSQL-backed row source.
///
/// Holds `readers` independent connections so the paged sub-queries run as
/// truly concurrent cursors; `fetch_page` dispatches round-robin.
pub struct PgRowSource {
    workers: Vec<PgWorker>,
    next: AtomicUsize,
    columns: Vec<String>,
}

impl PgRowSource {
    /// Connect the worker pool and prepare the paged statement on every
    /// connection. Preparing also discovers the result-set column names,
    /// which are authoritative for row arity and rule binding.
    pub async fn connect(
        conn: &ConnSpec,
        plan: &QueryPlan,
        readers: usize,
    ) -> Result<Self, ExportError> {
        let config = pg_config(conn)?;

        let mut workers = Vec::with_capacity(readers.max(1));
        for _ in 0..readers.max(1) {
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|err| ExportError::DatabaseUnavailable(err.to_string()))?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!("postgres connection error: {err}");
                }
            });
            let paged = client
                .prepare(&plan.paged_sql)
                .await
                .map_err(|err| ExportError::DatabaseUnavailable(err.to_string()))?;
            workers.push(PgWorker { client, paged });
        }

        let columns = workers[0]
            .paged
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
            columns,
        })
    }

    /// Result-set column names in SELECT order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Run the COUNT variant of the plan.
    pub async fn count_rows(&self, plan: &QueryPlan) -> Result<u64, ExportError> {
        let row = self.workers[0]
            .client
            .query_one(&plan.count_sql, &[])
            .await
            .map_err(|err| ExportError::DatabaseUnavailable(err.to_string()))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|err| ExportError::DatabaseUnavailable(err.to_string()))?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl RowSource for PgRowSource {
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<Row>, ExportError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        let rows = worker
            .client
            .query(&worker.paged, &[&limit, &offset])
            .await
            .map_err(|err| ExportError::Query(err.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|cell| render_cell(row, cell))
                    .collect::<Row>()
            })
            .collect())
    }
}

fn pg_config(conn: &ConnSpec) -> Result<tokio_postgres::Config, ExportError> {
    let port: u16 = conn.port.parse().map_err(|_| {
        ExportError::ConfigMalformed(format!("connection port `{}` is not valid", conn.port))
    })?;
    let mut config = tokio_postgres::Config::new();
    config
        .host(&conn.host)
        .port(port)
        .user(&conn.user)
        .password(&conn.pwd)
        .dbname(&conn.database);
    Ok(config)
}

/// Render a single cell as a string, NULLs as empty.
///
/// Matched by the wire type name reported by the server; a type without a
/// string rendering comes out as `*`.
fn render_cell(row: &tokio_postgres::Row, index: usize) -> String {
    let type_name = row.columns()[index].type_().name();
    match type_name {
        "bool" => display_cell(row.try_get::<_, Option<bool>>(index)),
        "int2" => display_cell(row.try_get::<_, Option<i16>>(index)),
        "int4" => display_cell(row.try_get::<_, Option<i32>>(index)),
        "int8" => display_cell(row.try_get::<_, Option<i64>>(index)),
        "float4" => display_cell(row.try_get::<_, Option<f32>>(index)),
        "float8" => display_cell(row.try_get::<_, Option<f64>>(index)),
        "text" | "varchar" | "bpchar" | "name" => {
            display_cell(row.try_get::<_, Option<String>>(index))
        }
        "timestamp" => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .ok()
            .flatten()
            .map(|stamp| stamp.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_default(),
        "date" => row
            .try_get::<_, Option<chrono::NaiveDate>>(index)
            .ok()
            .flatten()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => {
            tracing::warn!("no string rendering for column type `{type_name}`");
            "*".to_string()
        }
    }
}

fn display_cell<T: ToString>(value: Result<Option<T>, tokio_postgres::Error>) -> String {
    value
        .ok()
        .flatten()
        .map(|cell| cell.to_string())
        .unwrap_or_default()
}
