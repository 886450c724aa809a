//! # ECS Engine
//!
//! The registry that owns the entity population and the active queries.
//!
//! The engine never stores component data. For each registered entity it
//! connects one listener per entity signal, at
//! [`EngineConfig::dispatch_priority`], so listeners attached directly to the
//! entity always run first. Those listeners hold a weak engine reference and
//! forward every event to every active query.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use kestrel_signal::{Connection, Signal};

use crate::config::EngineConfig;
use crate::entity::{Entity, EntityEvent, EntityId};
use crate::error::KestrelResult;
use crate::query::{Query, QueryState};

/// Listener handles the engine holds on one entity.
struct EntitySubscription {
    added: Connection,
    removed: Connection,
    invalidated: Connection,
}

impl EntitySubscription {
    fn disconnect(self, entity: &Entity) {
        entity.on_component_added().disconnect(self.added);
        entity.on_component_removed().disconnect(self.removed);
        entity.on_invalidated().disconnect(self.invalidated);
    }
}

struct EngineInner {
    config: EngineConfig,
    entities: RefCell<Vec<Entity>>,
    subscriptions: RefCell<HashMap<EntityId, EntitySubscription>>,
    queries: RefCell<Vec<Query>>,
    on_entity_added: Signal<Entity>,
    on_entity_removed: Signal<Entity>,
    on_entity_changed: Signal<EntityEvent>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let entities = std::mem::take(self.entities.get_mut());
        let mut subscriptions = std::mem::take(self.subscriptions.get_mut());
        for entity in &entities {
            if let Some(subscription) = subscriptions.remove(&entity.id()) {
                subscription.disconnect(entity);
            }
        }
    }
}

/// Entity and query registry.
///
/// `Engine` is a cheap handle; clones share the same registry.
///
/// # Example
///
/// ```rust
/// use kestrel_ecs::{Component, Engine, Entity, QueryBuilder};
///
/// struct Position;
/// impl Component for Position {}
/// struct View;
/// impl Component for View {}
///
/// let engine = Engine::new();
/// let query = QueryBuilder::new().contains::<Position>().contains::<View>().build();
/// engine.add_query(&query);
///
/// let entity = Entity::new().with(Position);
/// engine.add_entity(&entity);
/// assert!(query.is_empty());
///
/// entity.add(View);
/// assert_eq!(query.len(), 1);
///
/// engine.remove_entity(&entity);
/// assert!(query.is_empty());
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(EngineConfig::default())
    }

    /// Creates an engine with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::InvalidConfig`](crate::KestrelError::InvalidConfig)
    /// if `config` fails [`EngineConfig::validate`].
    pub fn with_config(config: EngineConfig) -> KestrelResult<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: EngineConfig) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                entities: RefCell::new(Vec::with_capacity(config.entity_capacity)),
                subscriptions: RefCell::new(HashMap::with_capacity(config.entity_capacity)),
                queries: RefCell::new(Vec::with_capacity(config.query_capacity)),
                config,
                on_entity_added: Signal::new(),
                on_entity_removed: Signal::new(),
                on_entity_changed: Signal::new(),
            }),
        }
    }

    /// The configuration this engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Fired after an entity is registered and matched against every query.
    #[must_use]
    pub fn on_entity_added(&self) -> &Signal<Entity> {
        &self.inner.on_entity_added
    }

    /// Fired after an entity is deregistered.
    #[must_use]
    pub fn on_entity_removed(&self) -> &Signal<Entity> {
        &self.inner.on_entity_removed
    }

    /// Rebroadcast of every event of every registered entity, after the
    /// queries have been updated.
    #[must_use]
    pub fn on_entity_changed(&self) -> &Signal<EntityEvent> {
        &self.inner.on_entity_changed
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Registers an entity and offers it to every active query.
    ///
    /// Returns `false` if the entity was already registered.
    pub fn add_entity(&self, entity: &Entity) -> bool {
        if self.has_entity(entity) {
            tracing::warn!(entity = %entity.id(), "entity already registered");
            return false;
        }

        let subscription = self.subscribe(entity);
        self.inner.entities.borrow_mut().push(entity.clone());
        self.inner
            .subscriptions
            .borrow_mut()
            .insert(entity.id(), subscription);
        tracing::debug!(entity = %entity.id(), "entity registered");

        for query in self.queries() {
            // A query handler may have removed the entity meanwhile.
            if !self.has_entity(entity) {
                break;
            }
            if query.is_active() {
                query.entity_added(entity);
            }
        }

        self.inner.on_entity_added.emit(entity);
        true
    }

    /// Deregisters an entity, then removes it from every query.
    ///
    /// The entity is detached before any query handler runs, so mutations
    /// made from those handlers no longer reach any query. Returns `false`
    /// if the entity was not registered.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        let subscription = self.inner.subscriptions.borrow_mut().remove(&entity.id());
        let Some(subscription) = subscription else {
            return false;
        };
        subscription.disconnect(entity);
        self.inner.entities.borrow_mut().retain(|e| e != entity);
        tracing::debug!(entity = %entity.id(), "entity deregistered");

        for query in self.queries() {
            // A query handler may have registered the entity again.
            if self.has_entity(entity) {
                break;
            }
            if query.is_active() {
                query.entity_removed(entity);
            }
        }

        self.inner.on_entity_removed.emit(entity);
        true
    }

    /// `true` if `entity` is registered.
    #[must_use]
    pub fn has_entity(&self, entity: &Entity) -> bool {
        self.inner.subscriptions.borrow().contains_key(&entity.id())
    }

    /// Looks up a registered entity by id.
    #[must_use]
    pub fn get_entity_by_id(&self, id: EntityId) -> Option<Entity> {
        self.inner
            .entities
            .borrow()
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    /// Registered entities, in registration order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.inner.entities.borrow().clone()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.inner.entities.borrow().len()
    }

    fn subscribe(&self, entity: &Entity) -> EntitySubscription {
        let priority = self.inner.config.dispatch_priority;
        EntitySubscription {
            added: entity
                .on_component_added()
                .connect_with_priority(self.dispatcher(), priority),
            removed: entity
                .on_component_removed()
                .connect_with_priority(self.dispatcher(), priority),
            invalidated: entity
                .on_invalidated()
                .connect_with_priority(self.dispatcher(), priority),
        }
    }

    fn dispatcher(&self) -> impl Fn(&EntityEvent) + 'static {
        let engine: Weak<EngineInner> = Rc::downgrade(&self.inner);
        move |event: &EntityEvent| {
            if let Some(inner) = engine.upgrade() {
                Engine { inner }.dispatch(event);
            }
        }
    }

    fn dispatch(&self, event: &EntityEvent) {
        if !self.has_entity(&event.entity) {
            return;
        }
        for query in self.queries() {
            // A query handler may have removed the entity; the change itself
            // still happened and is rebroadcast below.
            if !self.has_entity(&event.entity) {
                break;
            }
            if query.is_active() {
                query.entity_changed(&event.entity, &event.change);
            }
        }
        self.inner.on_entity_changed.emit(event);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Activates a query and matches it against the current population.
    ///
    /// Returns `false` if the query is already registered, here or with
    /// another engine.
    pub fn add_query(&self, query: &Query) -> bool {
        if self.has_query(query) {
            tracing::warn!("query already registered");
            return false;
        }
        if query.is_active() {
            tracing::warn!("query is active in another engine");
            return false;
        }

        query.set_state(QueryState::Active);
        self.inner.queries.borrow_mut().push(query.clone());
        tracing::debug!(queries = self.query_count(), "query registered");

        query.match_entities(&self.entities());
        true
    }

    /// Deactivates a query.
    ///
    /// The query keeps its last result list; call [`Query::clear`] to reset
    /// it. Returns `false` if the query was not registered.
    pub fn remove_query(&self, query: &Query) -> bool {
        let removed = {
            let mut queries = self.inner.queries.borrow_mut();
            match queries.iter().position(|q| q.ptr_eq(query)) {
                Some(index) => {
                    queries.remove(index);
                    true
                }
                None => false,
            }
        };

        if removed {
            query.set_state(QueryState::Inert);
            tracing::debug!(queries = self.query_count(), "query deregistered");
        }
        removed
    }

    /// `true` if `query` is registered.
    #[must_use]
    pub fn has_query(&self, query: &Query) -> bool {
        self.inner.queries.borrow().iter().any(|q| q.ptr_eq(query))
    }

    /// Registered queries, in registration order.
    #[must_use]
    pub fn queries(&self) -> Vec<Query> {
        self.inner.queries.borrow().clone()
    }

    /// Number of registered queries.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.inner.queries.borrow().len()
    }

    /// Removes every entity, then every query.
    pub fn clear(&self) {
        for entity in self.entities() {
            self.remove_entity(&entity);
        }
        for query in self.queries() {
            self.remove_query(&query);
        }
        tracing::debug!("engine cleared");
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("entities", &self.entity_count())
            .field("queries", &self.query_count())
            .field("dispatch_priority", &self.inner.config.dispatch_priority)
            .finish()
    }
}
