//! Estate CRUD: registry-driven CRUD dispatch for a multi-tenant estate management backend.

pub mod access;
pub mod case;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractors;
pub mod filter;
pub mod handlers;
pub mod model;
pub mod registry;
pub mod resource;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;
pub mod worker;

pub use access::{AccessManager, AccessRule, Permission, Role, Verb};
pub use config::Settings;
pub use dispatch::{Dispatcher, EntityDescriptor, EntityHooks, Flow, NoHooks, Reply, RequestContext};
pub use error::{ConfigError, EngineError, StoreError};
pub use extractors::Session;
pub use filter::FilterOptions;
pub use registry::{Entity, EntityRegistry, Record};
pub use resource::ResourceCatalog;
pub use response::ResponseEnvelope;
pub use routes::{app, common_routes, crud_routes};
pub use service::CrudEngine;
pub use state::AppState;
pub use store::{MemoryStore, PgStore, Store, Transaction};
pub use worker::{TaskHandler, TaskRunner};
