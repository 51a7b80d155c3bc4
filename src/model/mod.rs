//! The property-management entity set and its registration table.

mod entities;
mod hooks;

pub use entities::{Due, GatePass, Residency, Resident, Site, Street, Task, Unit, User};
pub use hooks::{RefuseWhileReferenced, STREET_IN_USE, UNIT_IN_USE};

use crate::dispatch::{Dispatcher, EntityDescriptor};
use crate::error::EngineError;
use crate::registry::EntityRegistry;

/// Coarse user types carried by the session, lowest first.
pub mod user_type {
    pub const SERVICE: i64 = 1;
    pub const SECURITY: i64 = 2;
    pub const RESIDENT: i64 = 3;
    pub const OFFICIAL: i64 = 4;
    pub const ADMIN: i64 = 5;
    pub const PLATFORM: i64 = 6;
}

/// Register every entity type under its canonical name.
pub fn register_models(registry: &EntityRegistry) -> Result<(), EngineError> {
    registry.register::<Site>("Site")?;
    registry.register::<User>("User")?;
    registry.register::<Street>("Street")?;
    registry.register::<Unit>("Unit")?;
    registry.register::<Resident>("Resident")?;
    registry.register::<Residency>("Residency")?;
    registry.register::<Due>("Due")?;
    registry.register::<GatePass>("GatePass")?;
    registry.register::<Task>("Task")?;
    Ok(())
}

/// How each entity is exposed: exclude lists, tenant scoping, access levels and hooks.
pub fn descriptors() -> Vec<EntityDescriptor> {
    use user_type::*;
    vec![
        EntityDescriptor::new("Site").exclude("SiteID").unscoped().min_access(PLATFORM),
        EntityDescriptor::new("User")
            .exclude("SiteID,IsSiteUser")
            .min_access(ADMIN),
        EntityDescriptor::new("Street")
            .exclude("SiteID")
            .min_access(OFFICIAL)
            .hooks(STREET_IN_USE),
        EntityDescriptor::new("Unit")
            .exclude("SiteID")
            .min_access(OFFICIAL)
            .hooks(UNIT_IN_USE),
        EntityDescriptor::new("Resident")
            .exclude("SiteID,UnitID,PrimaryID,Type,ActiveStatus")
            .min_access(RESIDENT),
        EntityDescriptor::new("Residency")
            .exclude("ID,Type,SiteID")
            .min_access(RESIDENT),
        EntityDescriptor::new("Due")
            .exclude("SiteID,DateCreated")
            .min_access(SERVICE),
        EntityDescriptor::new("GatePass")
            .exclude("SiteID,Token,ResidentID")
            .min_access(SECURITY),
        EntityDescriptor::new("Task").exclude("SiteID").min_access(ADMIN),
    ]
}

/// Registry plus dispatcher wiring for the full entity set.
pub fn install(dispatcher: &mut Dispatcher) -> Result<(), EngineError> {
    register_models(dispatcher.engine().registry())?;
    for d in descriptors() {
        dispatcher.register(d)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_descriptor_names_a_registered_entity() {
        let registry = EntityRegistry::new();
        register_models(&registry).unwrap();
        for d in descriptors() {
            assert!(registry.contains(&d.name), "{} not registered", d.name);
        }
    }

    #[test]
    fn resident_reads_site_through_residency() {
        let registry = EntityRegistry::new();
        register_models(&registry).unwrap();
        let shape = registry.shape("Resident").unwrap();
        assert!(shape.has_password);
        assert_eq!(shape.query_shape.join_for("site_id").map(|j| j.alias), Some("rs"));
        assert!(!shape.persisted_fields().any(|f| f.name == "site_id"));
    }
}
