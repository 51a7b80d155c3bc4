pub mod common;
pub mod crud;

pub use common::common_routes;
pub use crud::crud_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Full application: common routes at the root, CRUD routes under `api_path` (an empty
/// path mounts them at the root).
pub fn app(state: AppState, api_path: &str, body_limit: usize) -> Router {
    let api_path = api_path.trim_end_matches('/');
    let router = Router::new().merge(common_routes());
    let router = if api_path.is_empty() {
        router.merge(crud_routes(state))
    } else {
        router.nest(api_path, crud_routes(state))
    };
    router.layer(RequestBodyLimitLayer::new(body_limit))
}
