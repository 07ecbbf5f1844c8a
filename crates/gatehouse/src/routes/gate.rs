//! Per-client gate endpoints.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    Json,
};
use gatehouse_common::constants::headers::X_CLIENT_ID;
use gatehouse_common::{AccessStats, GateError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::challenge::{SubmitOutcome, SubmittedProof};
use crate::gate::GateView;
use crate::state::AppState;

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl From<&GateError> for ErrorBody {
    fn from(err: &GateError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct GateResponse {
    view: GateView,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<SubmitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

fn respond(view: GateView, result: Result<SubmitOutcome, GateError>) -> Response {
    match result {
        Ok(outcome) => Json(GateResponse {
            view,
            outcome: Some(outcome),
            error: None,
        })
        .into_response(),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = GateResponse {
                view,
                outcome: None,
                error: Some(ErrorBody::from(&err)),
            };
            (status, Json(body)).into_response()
        }
    }
}

/// Browser identity from the `X-Client-Id` header
fn client_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(X_CLIENT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": {
                        "code": "missing_client_id",
                        "message": format!("{} header is required", X_CLIENT_ID),
                    }
                })),
            )
                .into_response()
        })
}

/// Access-log context taken from the request
fn request_context(headers: &HeaderMap) -> Map<String, Value> {
    let mut context = Map::new();
    for (field, name) in [("user_agent", header::USER_AGENT), ("url", header::REFERER)] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            context.insert(field.into(), value.into());
        }
    }
    context
}

/// Mount (or reuse) the client's gate
pub async fn get_gate(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<GateView>, Response> {
    let client = client_id(&headers)?;
    let gate = state.gate(&client).await;
    Ok(Json(gate.view()))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    token: Option<String>,
}

pub async fn verify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<VerifyRequest>,
) -> Result<Response, Response> {
    let client = client_id(&headers)?;
    let gate = state.gate(&client).await;

    let proof = SubmittedProof::new(payload.token);
    let result = gate.submit_challenge(&proof, &request_context(&headers)).await;
    if let Err(ref e) = result {
        tracing::debug!(client = %client, error = %e, "Challenge submission rejected");
    }

    Ok(respond(gate.view(), result))
}

#[derive(Deserialize)]
pub struct BypassRequest {
    password: String,
}

pub async fn bypass(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BypassRequest>,
) -> Result<Response, Response> {
    let client = client_id(&headers)?;
    let gate = state.gate(&client).await;

    let result = gate
        .submit_bypass(&payload.password, &request_context(&headers))
        .await;
    Ok(respond(gate.view(), result))
}

/// Unmount the client's gate
pub async fn unmount(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    let client = client_id(&headers)?;

    if state.unmount(&client).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    stats: AccessStats,
    bypass_session: bool,
}

/// Access statistics; never mounts a gate
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, Response> {
    let client = client_id(&headers)?;

    let (stats, bypass_session) = state.stats(&client).await.map_err(|err| {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": ErrorBody::from(&err) }))).into_response()
    })?;

    Ok(Json(StatsResponse {
        stats,
        bypass_session,
    }))
}
