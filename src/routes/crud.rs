//! Entity CRUD routes. Path parameters carry the model name, id or field/value pair; the
//! dispatcher resolves the entity.

use crate::handlers::crud::{delete, list, multi, read, read_by_field, require_access, save};
use crate::state::AppState;
use axum::{middleware, routing::get, Router};

pub fn crud_routes(state: AppState) -> Router {
    Router::new()
        .route("/multi/:list", get(multi))
        .route("/:model", get(list).post(save))
        .route("/:model/:id", get(read).post(save).delete(delete))
        .route("/:model/:field/:value", get(read_by_field))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access))
        .with_state(state)
}
