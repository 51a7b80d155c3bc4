//! Binds the surface operations to the CRUD engine: entity lookup, tenant scope, hook
//! pipeline, transactions, sideloads, and response assembly.

use super::{EntityDescriptor, Flow};
use crate::case::canonical_entity_name;
use crate::error::EngineError;
use crate::extractors::Session;
use crate::filter::{FilterOptions, PAIR_SEP};
use crate::registry::{EntityShape, Record, PASSWORD_FIELD, PASSWORD_MASK};
use crate::response::ResponseEnvelope;
use crate::service::{finish, CrudEngine};
use crate::store::Transaction;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;

/// Query parameter carrying `|`-separated sideload groups.
pub const LIST_PARAM: &str = "_list";
/// Query parameter carrying the list filter expression.
pub const FILTER_PARAM: &str = "_filter";
/// Query parameter a platform user may use to act on another site.
pub const SITE_OVERRIDE_PARAM: &str = "_siteID_";
/// Path id that means "create".
pub const NEW_ID: &str = "new";
/// User type allowed to override the site.
pub const PLATFORM_USER_TYPE: i64 = 6;

const GROUP_SEP: char = '|';
const SITE_FIELD: &str = "site_id";
const UNKNOWN_SITE: &str = "unknown";

/// Per-request inputs handed to hooks.
#[derive(Clone)]
pub struct RequestContext {
    pub session: Session,
    /// Tenant scope for this request.
    pub site_id: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub engine: CrudEngine,
}

impl RequestContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Status plus envelope for one dispatched operation.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: ResponseEnvelope,
}

impl Reply {
    pub fn ok(body: ResponseEnvelope) -> Self {
        Reply {
            status: StatusCode::OK,
            body,
        }
    }

    /// Failure reply. An error message a hook already placed in `resp` is kept; otherwise
    /// the envelope is replaced by one carrying only the error's public message.
    pub fn failed(err: EngineError, resp: ResponseEnvelope) -> Self {
        let status = err.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "operation failed");
        } else {
            tracing::debug!(error = %err, "operation rejected");
        }
        let body = if resp.is_error() {
            resp
        } else {
            let mut fresh = ResponseEnvelope::default();
            fresh.api_error(err.public_message());
            fresh
        };
        Reply { status, body }
    }

    fn from_result(res: Result<(), EngineError>, resp: ResponseEnvelope) -> Self {
        match res {
            Ok(()) => Reply::ok(resp),
            Err(e) => Reply::failed(e, resp),
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Registered entity descriptors plus the engine they dispatch to. Built at boot, then
/// shared read-only.
pub struct Dispatcher {
    engine: CrudEngine,
    entities: Vec<EntityDescriptor>,
    platform_user_type: i64,
}

impl Dispatcher {
    pub fn new(engine: CrudEngine) -> Self {
        Dispatcher {
            engine,
            entities: Vec::new(),
            platform_user_type: PLATFORM_USER_TYPE,
        }
    }

    pub fn with_platform_user_type(mut self, user_type: i64) -> Self {
        self.platform_user_type = user_type;
        self
    }

    pub fn engine(&self) -> &CrudEngine {
        &self.engine
    }

    /// Expose a registered entity. The first descriptor for a name wins; later ones are
    /// ignored and return `Ok(false)`.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<bool, EngineError> {
        self.engine.registry().shape(&descriptor.name)?;
        if self.entities.iter().any(|e| e.name == descriptor.name) {
            tracing::debug!(entity = %descriptor.name, "descriptor already registered, ignoring");
            return Ok(false);
        }
        self.entities.push(descriptor);
        Ok(true)
    }

    pub fn descriptors(&self) -> &[EntityDescriptor] {
        &self.entities
    }

    /// Descriptor for `name` if `user_type` meets its minimum access level.
    pub fn find(&self, name: &str, user_type: i64) -> Option<&EntityDescriptor> {
        self.entities
            .iter()
            .find(|e| e.name == name && e.visible_to(user_type))
    }

    pub fn context(
        &self,
        session: Session,
        params: HashMap<String, String>,
        query: HashMap<String, String>,
    ) -> RequestContext {
        let site_id = self.site_id(&session, &query);
        RequestContext {
            session,
            site_id,
            params,
            query,
            engine: self.engine.clone(),
        }
    }

    /// The session's site, or the `_siteID_` override for a platform user.
    fn site_id(&self, session: &Session, query: &HashMap<String, String>) -> String {
        if session.user_type == self.platform_user_type {
            if let Some(site) = query.get(SITE_OVERRIDE_PARAM).filter(|s| !s.is_empty()) {
                return site.clone();
            }
        }
        if session.site_id.is_empty() {
            UNKNOWN_SITE.to_string()
        } else {
            session.site_id.clone()
        }
    }

    fn resolve(&self, ctx: &RequestContext, model: &str) -> Result<&EntityDescriptor, EngineError> {
        let name = canonical_entity_name(model);
        self.find(&name, ctx.session.user_type)
            .ok_or(EngineError::UnknownType(name))
    }

    fn scoped(&self, ctx: &RequestContext, d: &EntityDescriptor, shape: &EntityShape) -> bool {
        d.site_scoped && shape.has_field(SITE_FIELD) && !ctx.site_id.is_empty()
    }

    fn scope(&self, ctx: &RequestContext, d: &EntityDescriptor, shape: &EntityShape, filter: &mut FilterOptions) {
        if self.scoped(ctx, d, shape) {
            filter.set(SITE_FIELD, ctx.site_id.clone());
        }
    }

    /// `GET /:model/:id`
    pub async fn get(&self, ctx: &RequestContext, model: &str, id: &str) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.read(ctx, model, None, id, &mut resp).await;
        Reply::from_result(res, resp)
    }

    /// `GET /:model/:field/:value`
    pub async fn get_by_field(&self, ctx: &RequestContext, model: &str, field: &str, value: &str) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.read(ctx, model, Some(field), value, &mut resp).await;
        Reply::from_result(res, resp)
    }

    /// `GET /:model?_filter=...`
    pub async fn list(&self, ctx: &RequestContext, model: &str) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.list_inner(ctx, model, &mut resp).await;
        Reply::from_result(res, resp)
    }

    /// `GET /multi/:list`
    pub async fn multi(&self, ctx: &RequestContext, list: &str) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.get_items(ctx, list, &mut resp).await;
        Reply::from_result(res, resp)
    }

    /// `POST /:model` and `POST /:model/:id`. No id, or `new`, creates.
    pub async fn save(&self, ctx: &RequestContext, model: &str, id: Option<&str>, body: Value) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.save_inner(ctx, model, id, body, &mut resp).await;
        Reply::from_result(res, resp)
    }

    /// `DELETE /:model/:id`
    pub async fn delete(&self, ctx: &RequestContext, model: &str, id: &str) -> Reply {
        let mut resp = ResponseEnvelope::default();
        let res = self.delete_inner(ctx, model, id, &mut resp).await;
        Reply::from_result(res, resp)
    }

    async fn read(
        &self,
        ctx: &RequestContext,
        model: &str,
        field: Option<&str>,
        value: &str,
        resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        let d = self.resolve(ctx, model)?;
        let shape = self.engine.registry().shape(&d.name)?;
        let field = field.unwrap_or(shape.primary_key);
        let mut filter = FilterOptions::new();
        self.scope(ctx, d, &shape, &mut filter);

        let flow = d.hooks.before_read(ctx, d, field, value, &mut filter, resp).await?;
        if flow.stopped() {
            tracing::debug!(entity = %d.name, "before_read answered the request");
        } else {
            let mut record = self
                .engine
                .get_by(&d.name, field, value, &filter, d.table_override())
                .await?;
            mask_password(&shape, &mut record);
            d.hooks.after_read(ctx, d, &mut record, resp).await?;
            resp.set("record", record.into_value());
        }
        self.sideload(ctx, resp).await
    }

    async fn list_inner(&self, ctx: &RequestContext, model: &str, resp: &mut ResponseEnvelope) -> Result<(), EngineError> {
        let d = self.resolve(ctx, model)?;
        let shape = self.engine.registry().shape(&d.name)?;
        let mut filter = FilterOptions::parse(ctx.query_param(FILTER_PARAM).unwrap_or_default(), PAIR_SEP);
        self.scope(ctx, d, &shape, &mut filter);

        if d.hooks.before_list(ctx, &mut filter, resp).await?.stopped() {
            tracing::debug!(entity = %d.name, "before_list answered the request");
        } else {
            let (mut records, count) = self
                .engine
                .list_and_count(&d.name, &filter, d.table_override())
                .await?;
            d.hooks.after_list(ctx, &mut records, resp).await?;
            resp.set("list", records_value(&shape, records));
            resp.set("count", count);
        }
        self.sideload(ctx, resp).await
    }

    async fn save_inner(
        &self,
        ctx: &RequestContext,
        model: &str,
        id: Option<&str>,
        body: Value,
        resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        let d = self.resolve(ctx, model)?;
        let shape = self.engine.registry().shape(&d.name)?;
        let mut form = shape.copy_compatible(&Record::from_value(body)?);
        let creating = id.map(|s| s.is_empty() || s == NEW_ID).unwrap_or(true);
        if let (false, Some(id)) = (creating, id) {
            form.insert(shape.primary_key.to_string(), Value::String(id.to_string()));
        }

        let mut tx = self.engine.begin().await?;
        let res = self
            .save_in(tx.as_mut(), ctx, d, &shape, creating, &mut form, resp)
            .await;
        finish(tx, res).await?;

        self.sideload(ctx, resp).await?;
        resp.set("status", "ok");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn save_in(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        d: &EntityDescriptor,
        shape: &EntityShape,
        creating: bool,
        form: &mut Record,
        resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        if d.hooks.before_save(tx, ctx, d, form, resp).await? == Flow::Stop {
            tracing::debug!(entity = %d.name, "before_save took over the write");
            return Ok(());
        }
        if creating {
            if self.scoped(ctx, d, shape) && shape.field(SITE_FIELD).map(|f| f.persisted).unwrap_or(false) {
                form.insert(SITE_FIELD.to_string(), Value::String(ctx.site_id.clone()));
            }
            self.engine.create(Some(&mut *tx), &d.name, form, false).await?;
            let id = form.get(shape.primary_key).cloned().unwrap_or(Value::Null);
            resp.set("id", id);
        } else {
            self.engine.save(Some(&mut *tx), &d.name, form, &d.exclude).await?;
        }
        d.hooks.after_save(tx, ctx, d, form, resp).await
    }

    async fn delete_inner(
        &self,
        ctx: &RequestContext,
        model: &str,
        id: &str,
        resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        let d = self.resolve(ctx, model)?;
        let mut tx = self.engine.begin().await?;
        let res = self.delete_in(tx.as_mut(), ctx, d, id, resp).await;
        finish(tx, res).await?;

        self.sideload(ctx, resp).await?;
        resp.set("status", "ok");
        Ok(())
    }

    async fn delete_in(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        d: &EntityDescriptor,
        id: &str,
        resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        if d.hooks.delete(tx, ctx, d, resp).await?.stopped() {
            tracing::debug!(entity = %d.name, id, "delete hook took over");
            return Ok(());
        }
        self.engine.delete(Some(&mut *tx), &d.name, id).await
    }

    async fn sideload(&self, ctx: &RequestContext, resp: &mut ResponseEnvelope) -> Result<(), EngineError> {
        match ctx.query_param(LIST_PARAM) {
            Some(items) if !items.trim().is_empty() => self.get_items(ctx, items, resp).await,
            _ => Ok(()),
        }
    }

    /// Fetch each `entity-filter` group of a `|`-separated list into `resp`, keyed by the
    /// name as given. Groups naming an unknown or inaccessible entity are skipped.
    pub async fn get_items(&self, ctx: &RequestContext, items: &str, resp: &mut ResponseEnvelope) -> Result<(), EngineError> {
        for group in items.trim().split(GROUP_SEP) {
            if group.is_empty() {
                continue;
            }
            let (type_name, expr) = group.split_once('-').unwrap_or((group, ""));
            let Some(d) = self.find(&canonical_entity_name(type_name), ctx.session.user_type) else {
                tracing::warn!(entity = type_name, "sideload skipped: unknown type");
                continue;
            };
            let shape = self.engine.registry().shape(&d.name)?;
            let mut filter = FilterOptions::parse(expr, PAIR_SEP);
            self.scope(ctx, d, &shape, &mut filter);

            if d.hooks.before_list(ctx, &mut filter, resp).await?.stopped() {
                continue;
            }
            let mut records = self.engine.list(&d.name, &filter, d.table_override()).await?;
            d.hooks.after_list(ctx, &mut records, resp).await?;
            resp.set(type_name, records_value(&shape, records));
        }
        Ok(())
    }
}

fn mask_password(shape: &EntityShape, record: &mut Record) {
    if shape.has_password {
        record.insert(PASSWORD_FIELD.to_string(), Value::String(PASSWORD_MASK.to_string()));
    }
}

fn records_value(shape: &EntityShape, records: Vec<Record>) -> Value {
    Value::Array(
        records
            .into_iter()
            .map(|mut r| {
                mask_password(shape, &mut r);
                r.into_value()
            })
            .collect(),
    )
}
