//! Entity CRUD handlers. Each builds a request context from the session, path and query,
//! then hands off to the dispatcher.

use crate::access::Verb;
use crate::dispatch::Reply;
use crate::error::EngineError;
use crate::extractors::Session;
use crate::state::AppState;
use axum::{
    extract::{OriginalUri, Path, Query, Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

type Params = HashMap<String, String>;

fn segment(params: &Params, name: &str) -> String {
    params.get(name).cloned().unwrap_or_default()
}

pub async fn multi(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
) -> Reply {
    let list = segment(&params, "list");
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.multi(&ctx, &list).await
}

pub async fn list(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
) -> Reply {
    let model = segment(&params, "model");
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.list(&ctx, &model).await
}

pub async fn read(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
) -> Reply {
    let model = segment(&params, "model");
    let id = segment(&params, "id");
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.get(&ctx, &model, &id).await
}

pub async fn read_by_field(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
) -> Reply {
    let model = segment(&params, "model");
    let field = segment(&params, "field");
    let value = segment(&params, "value");
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.get_by_field(&ctx, &model, &field, &value).await
}

/// `POST /:model` and `POST /:model/:id`.
pub async fn save(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
    Json(body): Json<Value>,
) -> Reply {
    let model = segment(&params, "model");
    let id = params.get("id").cloned();
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.save(&ctx, &model, id.as_deref(), body).await
}

pub async fn delete(
    State(state): State<AppState>,
    session: Session,
    Path(params): Path<Params>,
    Query(query): Query<Params>,
) -> Reply {
    let model = segment(&params, "model");
    let id = segment(&params, "id");
    let ctx = state.dispatcher.context(session, params, query);
    state.dispatcher.delete(&ctx, &model, &id).await
}

/// Reject requests the access rules do not allow for the caller's role.
pub async fn require_access(
    State(state): State<AppState>,
    session: Session,
    req: Request,
    next: Next,
) -> Result<Response, EngineError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let verb = Verb::from_method(req.method());
    if let Err(e) = state.access.authorize(&path, verb, session.role) {
        tracing::debug!(path, role = ?session.role, "access denied");
        return Err(e);
    }
    Ok(next.run(req).await)
}
