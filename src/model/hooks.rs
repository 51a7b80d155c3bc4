//! Referential guards run before deletes.

use crate::dispatch::{EntityDescriptor, EntityHooks, Flow, RequestContext};
use crate::error::EngineError;
use crate::filter::FilterOptions;
use crate::response::ResponseEnvelope;
use crate::store::Transaction;
use async_trait::async_trait;

/// Refuses to delete a record while rows of `child` still point at it through `column`.
#[derive(Clone, Copy, Debug)]
pub struct RefuseWhileReferenced {
    pub child: &'static str,
    pub column: &'static str,
    pub message: &'static str,
}

#[async_trait]
impl EntityHooks for RefuseWhileReferenced {
    async fn delete(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        entity: &EntityDescriptor,
        resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        let id = ctx.param("id").unwrap_or_default();
        let shape = ctx.engine.registry().shape(self.child)?;
        let mut filter = FilterOptions::new();
        filter.set(self.column, id);
        let q = ctx.engine.query(&shape, &filter, None)?;
        let count = tx.count(&q).await?;
        if count > 0 {
            tracing::debug!(entity = %entity.name, id, count, child = self.child, "delete refused");
            resp.api_error(self.message);
            return Err(EngineError::Validation(self.message.to_string()));
        }
        Ok(Flow::Continue)
    }
}

pub const STREET_IN_USE: RefuseWhileReferenced = RefuseWhileReferenced {
    child: "Unit",
    column: "street_id",
    message: "can't delete: this street is associated with one or more units",
};

pub const UNIT_IN_USE: RefuseWhileReferenced = RefuseWhileReferenced {
    child: "Residency",
    column: "unit_id",
    message: "can't delete: this unit has one or more residencies",
};
