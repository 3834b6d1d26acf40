//! Entity identity: named, typed handles shared across stocks.
//!
//! An entity's identity is its `(name, kind)` pair; everything else lives on
//! the concrete type behind the trait object. Entities are reference-counted
//! because the same entity is handed from stock to stock over its lifetime;
//! at most one stock holds a given entity at any time.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// The name of an entity, e.g. `request-3` or `replica-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityName(String);

impl EntityName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityName {
    fn from(name: String) -> Self {
        EntityName(name)
    }
}

impl From<&str> for EntityName {
    fn from(name: &str) -> Self {
        EntityName(name.to_string())
    }
}

/// The kind tag of an entity. Stocks only accept entities of their own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKind(pub &'static str);

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The marker entity carried by the scenario bookkeeping movements.
pub const KIND_SCENARIO: EntityKind = EntityKind("Scenario");

/// A named, typed object carried through the simulation.
///
/// `as_any` lets domain stocks recover their concrete entity types; the
/// kernel itself never looks past name and kind.
pub trait Entity {
    fn name(&self) -> &EntityName;
    fn kind(&self) -> EntityKind;
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to an entity.
pub type EntityRef = Rc<dyn Entity>;

/// A plain entity with no behavior beyond its identity. Used for scenario
/// markers and desired-replicas tokens.
pub struct BaseEntity {
    name: EntityName,
    kind: EntityKind,
}

impl BaseEntity {
    pub fn new(name: impl Into<EntityName>, kind: EntityKind) -> EntityRef {
        Rc::new(BaseEntity {
            name: name.into(),
            kind,
        })
    }
}

impl Entity for BaseEntity {
    fn name(&self) -> &EntityName {
        &self.name
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_entity_exposes_name_and_kind() {
        let entity = BaseEntity::new("Scenario", KIND_SCENARIO);
        assert_eq!(entity.name().as_str(), "Scenario");
        assert_eq!(entity.kind(), KIND_SCENARIO);
    }

    #[test]
    fn entity_refs_share_identity() {
        let entity = BaseEntity::new("Desired", EntityKind("Desired"));
        let other = Rc::clone(&entity);
        assert!(Rc::ptr_eq(&entity, &other));
    }
}
