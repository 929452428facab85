// SPDX-License-Identifier: MIT

//! HTTP surface for the triage workflow.
//!
//! One executor is shared across requests, so the per-thread rules (busy
//! threads, pending suspensions) apply to concurrent API callers exactly as
//! they do in-process.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::flow::executor::{Executor, RunOutcome};
use crate::flow::state::{StateUpdate, ThreadId};
use crate::triage::email::fields;

pub async fn serve(
    executor: Executor,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let app = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/threads/{thread}", get(get_thread))
        .route("/api/threads/{thread}/runs", post(start_run))
        .route("/api/threads/{thread}/runs/stream", post(stream_run))
        .route("/api/threads/{thread}/resume", post(resume_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(executor);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    email_content: String,
    sender_id: String,
}

impl StartRequest {
    fn into_update(self) -> StateUpdate {
        HashMap::from([
            (fields::EMAIL_CONTENT.to_string(), json!(self.email_content)),
            (fields::SENDER_ID.to_string(), json!(self.sender_id)),
        ])
    }
}

fn outcome_body(outcome: &RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed { state, visited } => json!({
            "status": "completed",
            "state": state.to_json(),
            "visited": visited,
        }),
        RunOutcome::Suspended { payload, visited } => json!({
            "status": "suspended",
            "payload": payload,
            "visited": visited,
        }),
    }
}

async fn start_run(
    State(executor): State<Executor>,
    Path(thread): Path<String>,
    Json(request): Json<StartRequest>,
) -> Json<Value> {
    let thread = ThreadId::new(thread);
    match executor.start(&thread, request.into_update()).await {
        Ok(outcome) => Json(outcome_body(&outcome)),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn resume_run(
    State(executor): State<Executor>,
    Path(thread): Path<String>,
    Json(answer): Json<Value>,
) -> Json<Value> {
    let thread = ThreadId::new(thread);
    match executor.resume(&thread, answer).await {
        Ok(outcome) => Json(outcome_body(&outcome)),
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

async fn get_thread(State(executor): State<Executor>, Path(thread): Path<String>) -> Json<Value> {
    let thread = ThreadId::new(thread);
    match executor.store().state(&thread).await {
        None => Json(json!({ "error": "Thread not found" })),
        Some(state) => {
            let suspended = executor.store().checkpoint(&thread).await.map(|cp| {
                json!({
                    "pending_step": cp.pending_step,
                    "payload": cp.payload,
                    "since": cp.created_at.to_rfc3339(),
                })
            });
            Json(json!({ "state": state.to_json(), "suspended": suspended }))
        }
    }
}

async fn stream_run(
    State(executor): State<Executor>,
    Path(thread): Path<String>,
    Json(request): Json<StartRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(100);
    let thread = ThreadId::new(thread);

    tokio::spawn(async move {
        // Failures surface on the event stream as well; here they only need
        // logging.
        if let Err(e) = executor
            .start_with_events(&thread, request.into_update(), Some(tx))
            .await
        {
            log::error!("streamed run on thread {} failed: {}", thread, e);
        }
    });

    let stream = ReceiverStream::new(rx)
        .map(|event| Ok(Event::default().json_data(&event).unwrap_or_default()));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(1)))
}
