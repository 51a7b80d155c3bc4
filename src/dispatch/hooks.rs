//! Per-entity business hooks around the default operations.
//!
//! Every method has a no-op default, so an entity overrides only what it needs and the
//! dispatcher never checks whether a hook is present.

use super::{EntityDescriptor, RequestContext};
use crate::error::EngineError;
use crate::filter::FilterOptions;
use crate::registry::Record;
use crate::response::ResponseEnvelope;
use crate::store::Transaction;
use async_trait::async_trait;

/// Whether the default step after a before-hook runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Continue,
    /// Skip the default step; the hook produced the result itself.
    Stop,
}

impl Flow {
    pub fn stopped(self) -> bool {
        self == Flow::Stop
    }
}

#[async_trait]
pub trait EntityHooks: Send + Sync {
    /// Runs before a single-record read. May narrow `filter` or answer the request itself.
    async fn before_read(
        &self,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _field: &str,
        _value: &str,
        _filter: &mut FilterOptions,
        _resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        Ok(Flow::Continue)
    }

    async fn after_read(
        &self,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _record: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    async fn before_list(
        &self,
        _ctx: &RequestContext,
        _filter: &mut FilterOptions,
        _resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        Ok(Flow::Continue)
    }

    /// May rewrite the rows in place, e.g. to add derived fields.
    async fn after_list(
        &self,
        _ctx: &RequestContext,
        _records: &mut Vec<Record>,
        _resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs inside the save transaction. `Stop` skips both the default write and
    /// [`after_save`](Self::after_save); the transaction still commits.
    async fn before_save(
        &self,
        _tx: &mut dyn Transaction,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _form: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        Ok(Flow::Continue)
    }

    async fn after_save(
        &self,
        _tx: &mut dyn Transaction,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _form: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs inside the delete transaction before the default delete.
    async fn delete(
        &self,
        _tx: &mut dyn Transaction,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        Ok(Flow::Continue)
    }
}

/// Hook set that changes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl EntityHooks for NoHooks {}
