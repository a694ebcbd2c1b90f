//! HTTP API: a single JSON dispatch endpoint plus a health probe.
//!
//! `POST /rules` takes an object whose keys name operations. A body that is
//! not JSON is retried as base64-encoded JSON.

mod auth_middleware;

pub use auth_middleware::{extract_auth_context, AuthContext};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rules_hub_core::auth::TokenVerifier;
use rules_hub_core::{EditOutcome, EditRequest, RulesHub, WalkRequest};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RulesHub>,
    pub verifier: Option<Arc<dyn TokenVerifier>>,
}

pub fn router(hub: Arc<RulesHub>, verifier: Option<Arc<dyn TokenVerifier>>) -> Router {
    let state = AppState { hub, verifier };
    Router::new()
        .route("/rules", post(dispatch))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dispatch(
    State(state): State<AppState>,
    auth: AuthContext,
    body: Bytes,
) -> Result<Json<Value>, StatusCode> {
    let Some(request) = decode_body(&body) else {
        tracing::debug!(len = body.len(), "undecodable request body");
        return Err(StatusCode::BAD_REQUEST);
    };
    let hub = state.hub.clone();
    let out = tokio::task::spawn_blocking(move || run(&hub, auth.user_id.as_deref(), request))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "request task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(out))
}

fn decode_body(body: &[u8]) -> Option<Value> {
    if let Ok(value) = serde_json::from_slice(body) {
        return Some(value);
    }
    let text = std::str::from_utf8(body).ok()?;
    let decoded = STANDARD.decode(text.trim()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl From<OneOrMany> for Vec<PathBuf> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(path) => vec![path],
            OneOrMany::Many(paths) => paths,
        }
    }
}

#[derive(Deserialize)]
struct SaveArgs {
    file: PathBuf,
    data: String,
}

/// One decoded operation.
#[derive(Debug)]
enum Call {
    Walk {
        roots: Vec<PathBuf>,
        request: WalkRequest,
    },
    Edit(Value),
    Read(Value),
    ListUsers,
    MakeNews(Value),
    Save(Value),
    Unknown(String),
}

impl Call {
    /// Split a request into calls. A `walkdir` key takes the whole request,
    /// the remaining keys being its parameters. Otherwise every key is one
    /// call, run in request order.
    fn decode(request: Value) -> Result<Vec<Call>, String> {
        let Value::Object(mut request) = request else {
            return Err("Request must be a JSON object.".to_string());
        };
        if let Some(roots) = request.remove("walkdir") {
            let roots: OneOrMany =
                serde_json::from_value(roots).map_err(|e| format!("Invalid walkdir: {e}"))?;
            let walk: WalkRequest = serde_json::from_value(Value::Object(request))
                .map_err(|e| format!("Invalid walkdir: {e}"))?;
            return Ok(vec![Call::Walk {
                roots: roots.into(),
                request: walk,
            }]);
        }
        Ok(request
            .into_iter()
            .map(|(name, args)| match name.as_str() {
                "editobj" => Call::Edit(args),
                "readobj" => Call::Read(args),
                "getusers" => Call::ListUsers,
                "makenews" => Call::MakeNews(args),
                "save" => Call::Save(args),
                _ => Call::Unknown(name),
            })
            .collect())
    }

    fn run(self, hub: &RulesHub, user: Option<&str>) -> Value {
        match self {
            Call::Walk { roots, request } => {
                json!({ "walkdir": hub.walk_all(&roots, &request, user) })
            }
            Call::Edit(args) => {
                let outcome = match EditRequest::from_json(args) {
                    Ok(request) => hub.edit(&request, user),
                    Err(e) => EditOutcome::from(Err::<(), _>(e)),
                };
                serde_json::to_value(outcome).unwrap_or_else(|e| status_error(e.to_string()))
            }
            Call::Read(args) => {
                let path: PathBuf = match serde_json::from_value(args) {
                    Ok(path) => path,
                    Err(e) => return status_error(format!("Invalid readobj: {e}")),
                };
                hub.read(&path, user)
                    .unwrap_or_else(|e| status_error(e.to_string()))
            }
            Call::ListUsers => match hub.list_users() {
                Ok(users) => json!({ "users": users }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            Call::MakeNews(news) => match hub.publish_news(user, news) {
                Ok(users) => json!({ "users": users }),
                Err(e) => json!({ "error": e.to_string() }),
            },
            Call::Save(args) => save(hub, user, args),
            Call::Unknown(name) => {
                json!({ "error": format!("Function \"{name}\" does not exist.") })
            }
        }
    }
}

fn status_error(message: String) -> Value {
    json!({ "status": "error", "error": message })
}

fn save(hub: &RulesHub, user: Option<&str>, args: Value) -> Value {
    let SaveArgs { file, data } = match serde_json::from_value(args) {
        Ok(args) => args,
        Err(e) => return json!({ "error": format!("Invalid save: {e}") }),
    };
    let mut out = Map::new();
    out.insert("save".to_string(), json!(file));
    let result = STANDARD
        .decode(data.trim())
        .map_err(|e| format!("Invalid base64 data: {e}"))
        .and_then(|bytes| hub.save(&file, &bytes, user).map_err(|e| e.to_string()));
    match result {
        Ok(saved) => {
            out.insert("save".to_string(), json!(saved));
        }
        Err(message) => {
            out.insert("error".to_string(), Value::String(message));
        }
    }
    Value::Object(out)
}

/// Run every call of `request` and fold the results into one response.
/// Object results are merged key by key; any other result replaces what was
/// collected so far.
pub fn run(hub: &RulesHub, user: Option<&str>, request: Value) -> Value {
    let calls = match Call::decode(request) {
        Ok(calls) if calls.is_empty() => return json!({ "error": "Empty request." }),
        Ok(calls) => calls,
        Err(message) => return json!({ "error": message }),
    };
    let mut out = Value::Object(Map::new());
    for call in calls {
        tracing::debug!(?call, user, "dispatch");
        match (&mut out, call.run(hub, user)) {
            (Value::Object(out), Value::Object(result)) => out.extend(result),
            (out, result) => *out = result,
        }
    }
    out
}
