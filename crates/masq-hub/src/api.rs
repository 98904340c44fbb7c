//! # API Handlers
//!
//! Axum handlers for the export hub. Failures before the first body byte
//! come back as a 500 with the JSON message envelope; once the CSV stream
//! has started, a failure truncates the chunked body and the access log
//! records `[Failed]`.

use crate::error::ExportError;
use crate::pipeline;
use crate::source::PgRowSource;
use crate::workspace::{AccessEvent, AccessTally};
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use masq_core::plan;
use masq_core::rules::RuleSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Serialize)]
pub struct MessageEnvelope {
    pub result: bool,
    pub message: Vec<String>,
}

#[derive(Serialize)]
pub struct ListEnvelope {
    pub result: bool,
    pub message: BTreeMap<String, AccessTally>,
}

#[derive(Serialize)]
pub struct InfoEnvelope {
    pub result: bool,
    pub message: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct InfoParams {
    pub id: String,
}

fn error_response(err: &ExportError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(MessageEnvelope {
            result: false,
            message: vec![err.to_string()],
        }),
    )
        .into_response()
}

pub async fn health() -> &'static str {
    "alive"
}

// =============================================================================
// Export
// =============================================================================

struct PreparedExport {
    source: Arc<PgRowSource>,
    columns: Vec<String>,
    total_rows: u64,
    rules: RuleSet,
}

async fn prepare_export(
    state: &AppState,
    request_id: &str,
) -> Result<PreparedExport, ExportError> {
    let (query, options) = state.workspace.load(request_id)?;
    let query_plan = plan::build(&query)?;
    let source = PgRowSource::connect(&query.conn, &query_plan, state.settings.readers).await?;
    let total_rows = source.count_rows(&query_plan).await?;
    let columns = source.columns().to_vec();
    let rules = RuleSet::bind(&columns, &options)?;
    tracing::debug!(
        request = %request_id,
        total_rows,
        columns = columns.len(),
        "planned export"
    );
    Ok(PreparedExport {
        source: Arc::new(source),
        columns,
        total_rows,
        rules,
    })
}

/// `GET /request/{requestID}` — stream the anonymized CSV.
pub async fn export_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    let prepared = match prepare_export(&state, &request_id).await {
        Ok(prepared) => prepared,
        Err(err) => {
            tracing::error!(request = %request_id, "export rejected: {err}");
            return error_response(&err);
        }
    };
    state.workspace.append_access(AccessEvent::Attempt, &request_id);

    let (body_tx, body_rx) = mpsc::channel(64);
    let supervisor_state = state.clone();
    let supervisor_id = request_id.clone();
    let settings = state.settings.clone();
    tokio::spawn(async move {
        let result = pipeline::run(
            prepared.source,
            prepared.columns,
            prepared.total_rows,
            prepared.rules,
            &settings,
            body_tx,
        )
        .await;
        match result {
            Ok(rows) => {
                tracing::info!(request = %supervisor_id, rows, "export finished");
                supervisor_state
                    .workspace
                    .append_access(AccessEvent::Success, &supervisor_id);
            }
            Err(err) => {
                tracing::error!(request = %supervisor_id, "export failed: {err}");
                supervisor_state
                    .workspace
                    .append_access(AccessEvent::Failed, &supervisor_id);
            }
        }
    });

    (
        StatusCode::OK,
        [
            (header::CONNECTION, "Keep-Alive"),
            (header::TRANSFER_ENCODING, "chunked"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (
                header::CONTENT_DISPOSITION,
                "attachment;filename=exportData.csv",
            ),
            (header::CONTENT_TYPE, "application/octet-stream"),
        ],
        Body::from_stream(ReceiverStream::new(body_rx)),
    )
        .into_response()
}

// =============================================================================
// Request inventory
// =============================================================================

/// `GET /request/list` — per-request export history from the access log.
pub async fn request_list(State(state): State<Arc<AppState>>) -> Response {
    match state.workspace.list_requests() {
        Ok(tallies) => Json(ListEnvelope {
            result: true,
            message: tallies,
        })
        .into_response(),
        Err(err) => error_response(&ExportError::ConfigMalformed(err.to_string())),
    }
}

/// `GET /request/info?id=...` — endpoint and assembled syntax of a request.
pub async fn request_info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InfoParams>,
) -> Response {
    let info = state.workspace.load(&params.id).and_then(|(query, _)| {
        let query_plan = plan::build(&query)?;
        let mut message = BTreeMap::new();
        message.insert(
            "endpoint".to_string(),
            format!("{}:{}", query.conn.host, query.conn.port),
        );
        message.insert("database".to_string(), query.conn.database);
        message.insert("table".to_string(), query.conn.table);
        message.insert("syntax".to_string(), query_plan.base_sql);
        Ok(message)
    });

    match info {
        Ok(message) => Json(InfoEnvelope {
            result: true,
            message,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}
