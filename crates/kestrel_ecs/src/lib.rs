//! # KESTREL ECS
//!
//! Signal-driven Entity Component System with live queries.
//!
//! ## Architecture Rules
//!
//! 1. **Entities own their data** - components live in per-entity storage
//!    and every change is published on the entity's signals
//! 2. **Queries are incremental** - an event re-evaluates one entity against
//!    each active query; result lists only change on membership flips
//! 3. **Entity listeners run first** - the engine subscribes at the highest
//!    dispatch priority, so queries see a change after direct observers do
//!
//! ## Example
//!
//! ```rust
//! use kestrel_ecs::{Component, Engine, Entity, QueryBuilder};
//!
//! struct Position;
//! impl Component for Position {}
//!
//! struct View;
//! impl Component for View {}
//!
//! let engine = Engine::new();
//! let query = QueryBuilder::new().contains::<Position>().contains::<View>().build();
//! query.on_entity_added().connect(|snapshot| {
//!     assert!(!snapshot.previous().has::<View>());
//! });
//! engine.add_query(&query);
//!
//! let entity = Entity::new().with(Position);
//! engine.add_entity(&entity);
//! entity.add(View);
//! assert!(query.has(&entity));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod builder;
pub mod component;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod query;
pub mod snapshot;
mod storage;
pub mod tag;

pub use builder::QueryBuilder;
pub use component::{AnyComponent, Component, ComponentKind, ComponentSet, ComponentTypeId};
pub use config::{EngineConfig, ENGINE_DISPATCH_PRIORITY};
pub use engine::Engine;
pub use entity::{Entity, EntityChange, EntityEvent, EntityId};
pub use error::{KestrelError, KestrelResult};
pub use query::{Query, QueryPredicate, QueryState};
pub use snapshot::{EntitySnapshot, EntityView};
pub use tag::Tag;

pub use kestrel_signal::{Connection, Priority, Signal, DEFAULT_PRIORITY};
