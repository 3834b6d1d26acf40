//! Stocks: typed containers of entities.
//!
//! The kernel only knows the `Stock` trait. Three standard shapes cover most
//! needs: a FIFO `ThroughStock`, a minting `SourceStock`, and an absorbing
//! `SinkStock`. Domain stocks compose a `ThroughStock` delegate and override
//! `add`/`remove` with side effects that may schedule further movements via
//! the [`SimContext`] they receive.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::policy::PolicyError;
use crate::simulator::entity::{Entity, EntityKind, EntityName, EntityRef};
use crate::simulator::environment::SimContext;

/// The name of a stock, e.g. `RequestsProcessing [2]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StockName(String);

impl StockName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StockName {
    fn from(name: String) -> Self {
        StockName(name)
    }
}

impl From<&str> for StockName {
    fn from(name: &str) -> Self {
        StockName(name.to_string())
    }
}

/// Errors surfaced by `Stock::add`. All of them are fatal to a run.
#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("stock {stock} stocks {expects} entities, got {got} ({entity})")]
    KindMismatch {
        stock: StockName,
        expects: EntityKind,
        got: EntityKind,
        entity: EntityName,
    },

    #[error("stock {stock} rejected {entity}: {reason}")]
    Rejected {
        stock: StockName,
        entity: EntityName,
        reason: String,
    },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// A typed container of entities with a name and a fixed kind tag.
pub trait Stock {
    fn name(&self) -> StockName;
    fn kind_stocked(&self) -> EntityKind;
    fn count(&self) -> u64;
    fn entities_in_stock(&self) -> Vec<EntityRef>;

    /// Accept an entity. Side-effecting stocks may append notes to the
    /// in-flight movement and schedule follow-on movements through `ctx`.
    fn add(&self, entity: EntityRef, ctx: &mut SimContext<'_>) -> Result<(), StockError>;

    /// Release an entity, earliest first. `None` means the stock is empty,
    /// which the kernel records as `FromStockIsEmpty`.
    fn remove(&self, ctx: &mut SimContext<'_>) -> Option<EntityRef>;
}

/// Shared handle to a stock. Movements hold these as endpoints.
pub type StockRef = Rc<dyn Stock>;

/// FIFO through-stock: entities leave in insertion order.
pub struct ThroughStock {
    name: StockName,
    kind: EntityKind,
    entities: RefCell<VecDeque<EntityRef>>,
}

impl ThroughStock {
    pub fn new(name: impl Into<StockName>, kind: EntityKind) -> Self {
        ThroughStock {
            name: name.into(),
            kind,
            entities: RefCell::new(VecDeque::new()),
        }
    }

    /// Insert without a scheduling context. Domain stocks use this to drive
    /// their delegates and internal lanes.
    pub fn push(&self, entity: EntityRef) -> Result<(), StockError> {
        if entity.kind() != self.kind {
            return Err(StockError::KindMismatch {
                stock: self.name.clone(),
                expects: self.kind,
                got: entity.kind(),
                entity: entity.name().clone(),
            });
        }
        self.entities.borrow_mut().push_back(entity);
        Ok(())
    }

    /// Remove the earliest entity without a scheduling context.
    pub fn pop(&self) -> Option<EntityRef> {
        self.entities.borrow_mut().pop_front()
    }
}

impl Stock for ThroughStock {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        self.kind
    }

    fn count(&self) -> u64 {
        self.entities.borrow().len() as u64
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        self.entities.borrow().iter().map(Rc::clone).collect()
    }

    fn add(&self, entity: EntityRef, _ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        self.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        self.pop()
    }
}

/// Source stock: mints a fresh entity on every remove; holds nothing.
pub struct SourceStock {
    name: StockName,
    kind: EntityKind,
    minted: Cell<u64>,
    mint: Box<dyn Fn(u64) -> EntityRef>,
}

impl SourceStock {
    /// `mint` receives a 1-based sequence number for each minted entity.
    pub fn new(
        name: impl Into<StockName>,
        kind: EntityKind,
        mint: impl Fn(u64) -> EntityRef + 'static,
    ) -> Self {
        SourceStock {
            name: name.into(),
            kind,
            minted: Cell::new(0),
            mint: Box::new(mint),
        }
    }

    pub fn minted(&self) -> u64 {
        self.minted.get()
    }
}

impl Stock for SourceStock {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        self.kind
    }

    fn count(&self) -> u64 {
        0
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        Vec::new()
    }

    fn add(&self, entity: EntityRef, _ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        Err(StockError::Rejected {
            stock: self.name.clone(),
            entity: entity.name().clone(),
            reason: "source stocks do not accept entities".to_string(),
        })
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        let number = self.minted.get() + 1;
        self.minted.set(number);
        Some((self.mint)(number))
    }
}

/// Sink stock: absorbs entities and keeps them for counting; never releases.
pub struct SinkStock {
    name: StockName,
    kind: EntityKind,
    entities: RefCell<Vec<EntityRef>>,
}

impl SinkStock {
    pub fn new(name: impl Into<StockName>, kind: EntityKind) -> Self {
        SinkStock {
            name: name.into(),
            kind,
            entities: RefCell::new(Vec::new()),
        }
    }

    /// Insert without a scheduling context.
    pub fn push(&self, entity: EntityRef) -> Result<(), StockError> {
        if entity.kind() != self.kind {
            return Err(StockError::KindMismatch {
                stock: self.name.clone(),
                expects: self.kind,
                got: entity.kind(),
                entity: entity.name().clone(),
            });
        }
        self.entities.borrow_mut().push(entity);
        Ok(())
    }
}

impl Stock for SinkStock {
    fn name(&self) -> StockName {
        self.name.clone()
    }

    fn kind_stocked(&self) -> EntityKind {
        self.kind
    }

    fn count(&self) -> u64 {
        self.entities.borrow().len() as u64
    }

    fn entities_in_stock(&self) -> Vec<EntityRef> {
        self.entities.borrow().iter().map(Rc::clone).collect()
    }

    fn add(&self, entity: EntityRef, _ctx: &mut SimContext<'_>) -> Result<(), StockError> {
        self.push(entity)
    }

    fn remove(&self, _ctx: &mut SimContext<'_>) -> Option<EntityRef> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::entity::BaseEntity;

    const WIDGET: EntityKind = EntityKind("Widget");
    const GADGET: EntityKind = EntityKind("Gadget");

    #[test]
    fn through_stock_is_fifo() {
        let stock = ThroughStock::new("Holding", WIDGET);
        stock.push(BaseEntity::new("w-1", WIDGET)).unwrap();
        stock.push(BaseEntity::new("w-2", WIDGET)).unwrap();

        assert_eq!(stock.count(), 2);
        assert_eq!(stock.pop().unwrap().name().as_str(), "w-1");
        assert_eq!(stock.pop().unwrap().name().as_str(), "w-2");
        assert!(stock.pop().is_none());
    }

    #[test]
    fn through_stock_rejects_wrong_kind() {
        let stock = ThroughStock::new("Holding", WIDGET);
        let err = stock.push(BaseEntity::new("g-1", GADGET)).unwrap_err();
        assert!(matches!(err, StockError::KindMismatch { got, .. } if got == GADGET));
        assert_eq!(stock.count(), 0);
    }

    #[test]
    fn source_stock_mints_sequentially() {
        let source = SourceStock::new("WidgetSource", WIDGET, |n| {
            BaseEntity::new(format!("widget-{n}"), WIDGET)
        });
        let mut env = crate::simulator::environment::Environment::new(
            crate::simulator::SimTime::ORIGIN,
            std::time::Duration::from_secs(1),
            Box::new(crate::policy::FixedPolicy::new(0)),
        );
        env.with_context(|ctx| {
            let first = source.remove(ctx).unwrap();
            let second = source.remove(ctx).unwrap();
            assert_eq!(first.name().as_str(), "widget-1");
            assert_eq!(second.name().as_str(), "widget-2");
        });
        assert_eq!(source.minted(), 2);
        assert_eq!(source.count(), 0);
    }

    #[test]
    fn sink_stock_absorbs_and_never_releases() {
        let sink = SinkStock::new("Discarded", WIDGET);
        sink.push(BaseEntity::new("w-1", WIDGET)).unwrap();
        assert_eq!(sink.count(), 1);

        let mut env = crate::simulator::environment::Environment::new(
            crate::simulator::SimTime::ORIGIN,
            std::time::Duration::from_secs(1),
            Box::new(crate::policy::FixedPolicy::new(0)),
        );
        env.with_context(|ctx| {
            assert!(sink.remove(ctx).is_none());
        });
    }
}
