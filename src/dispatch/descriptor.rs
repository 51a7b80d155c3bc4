//! Registered metadata for one entity exposed through the dispatcher.

use super::hooks::{EntityHooks, NoHooks};
use crate::case::exclude_list;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct EntityDescriptor {
    /// Registry name, canonical form (`Unit`, `GatePass`).
    pub name: String,
    /// Columns a save never writes.
    pub exclude: Vec<String>,
    /// Storage table used for reads instead of the entity's own.
    pub table: Option<String>,
    /// Tenant scope is injected into filters and new records.
    pub site_scoped: bool,
    /// Lowest session user type allowed to reach the entity.
    pub min_access: i64,
    pub hooks: Arc<dyn EntityHooks>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        EntityDescriptor {
            name: name.into(),
            exclude: Vec::new(),
            table: None,
            site_scoped: true,
            min_access: 0,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Comma-separated exclude list; `SiteID` style names are accepted.
    pub fn exclude(mut self, list: &str) -> Self {
        self.exclude = exclude_list(list);
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn unscoped(mut self) -> Self {
        self.site_scoped = false;
        self
    }

    pub fn min_access(mut self, user_type: i64) -> Self {
        self.min_access = user_type;
        self
    }

    pub fn hooks(mut self, hooks: impl EntityHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn table_override(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn visible_to(&self, user_type: i64) -> bool {
        user_type >= self.min_access
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("name", &self.name)
            .field("exclude", &self.exclude)
            .field("table", &self.table)
            .field("site_scoped", &self.site_scoped)
            .field("min_access", &self.min_access)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_normalises_exclude_list() {
        let d = EntityDescriptor::new("Due").exclude("SiteID, CreatedAt").min_access(4).unscoped();
        assert_eq!(d.exclude, vec!["site_id", "created_at"]);
        assert!(!d.site_scoped);
        assert!(d.visible_to(5));
        assert!(!d.visible_to(3));
    }
}
