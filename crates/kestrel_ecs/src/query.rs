//! # Live Queries
//!
//! A [`Query`] pairs a predicate with a materialized result list. The list
//! is kept in insertion order and updated incrementally: every entity event
//! re-runs the predicate for that one entity, and the list only changes when
//! membership flips.
//!
//! ## Lifecycle
//!
//! ```text
//! Unregistered ──Engine::add_query──> Active ──Engine::remove_query──> Inert
//!       │                               ▲                                │
//!       └─ match_entities / direct ─────┘                                │
//!          entity_* calls work here       Engine::add_query again ◄──────┘
//! ```
//!
//! An inert query keeps its last result list and ignores entity events.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use kestrel_signal::Signal;

use crate::component::AnyComponent;
use crate::entity::{Entity, EntityChange, EntityId};
use crate::snapshot::EntitySnapshot;
use crate::tag::Tag;

/// Membership test evaluated against an entity's current state.
pub type QueryPredicate = dyn Fn(&Entity) -> bool;

/// Where a query is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    /// Not registered with an engine.
    Unregistered,
    /// Registered; receives entity events from its engine.
    Active,
    /// Removed from its engine; result list frozen.
    Inert,
}

struct QueryInner {
    predicate: Box<QueryPredicate>,
    entities: RefCell<Vec<Entity>>,
    members: RefCell<HashSet<EntityId>>,
    state: Cell<QueryState>,
    on_entity_added: Signal<EntitySnapshot>,
    on_entity_removed: Signal<EntitySnapshot>,
}

/// A live, incrementally maintained set of entities matching a predicate.
///
/// # Example
///
/// ```rust
/// use kestrel_ecs::{Component, Engine, Entity, Query};
///
/// struct View;
/// impl Component for View {}
///
/// let engine = Engine::new();
/// let query = Query::new(|entity| entity.has::<View>());
/// engine.add_query(&query);
///
/// let entity = Entity::new();
/// engine.add_entity(&entity);
/// assert!(query.is_empty());
///
/// entity.add(View);
/// assert_eq!(query.first(), Some(entity));
/// ```
#[derive(Clone)]
pub struct Query {
    inner: Rc<QueryInner>,
}

impl Query {
    /// Creates an unregistered query.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Entity) -> bool + 'static,
    {
        Self {
            inner: Rc::new(QueryInner {
                predicate: Box::new(predicate),
                entities: RefCell::new(Vec::new()),
                members: RefCell::new(HashSet::new()),
                state: Cell::new(QueryState::Unregistered),
                on_entity_added: Signal::new(),
                on_entity_removed: Signal::new(),
            }),
        }
    }

    /// Fired when an entity enters the result list.
    #[must_use]
    pub fn on_entity_added(&self) -> &Signal<EntitySnapshot> {
        &self.inner.on_entity_added
    }

    /// Fired when an entity leaves the result list.
    #[must_use]
    pub fn on_entity_removed(&self) -> &Signal<EntitySnapshot> {
        &self.inner.on_entity_removed
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.inner.state.get()
    }

    /// `true` while registered with an engine.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == QueryState::Active
    }

    pub(crate) fn set_state(&self, state: QueryState) {
        self.inner.state.set(state);
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Evaluates the predicate without touching the result list.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        (self.inner.predicate)(entity)
    }

    // =========================================================================
    // Membership updates
    // =========================================================================

    /// Resets the result list to the matching entities of `entities`.
    ///
    /// The list is cleared silently; each match is then appended in input
    /// order and announced through `on_entity_added`. No subscription is
    /// made: only an engine keeps a query current.
    pub fn match_entities<'a, I>(&self, entities: I)
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        self.clear();
        for entity in entities {
            self.entity_added(entity);
        }
    }

    /// Empties the result list without firing any signal.
    pub fn clear(&self) {
        self.inner.entities.borrow_mut().clear();
        self.inner.members.borrow_mut().clear();
    }

    /// Adds `entity` if it matches and is not already listed.
    pub(crate) fn entity_added(&self, entity: &Entity) {
        if !self.has(entity) && self.matches(entity) {
            self.insert(entity);
            self.announce_added(entity, None);
        }
    }

    /// Drops `entity` from the list, announcing it if it was listed.
    pub(crate) fn entity_removed(&self, entity: &Entity) {
        if self.take(entity) {
            self.announce_removed(entity, None);
        }
    }

    /// Re-evaluates `entity` after `component` was attached to it.
    pub fn entity_component_added(&self, entity: &Entity, component: &AnyComponent) {
        self.entity_changed(entity, &EntityChange::ComponentAdded(component.clone()));
    }

    /// Re-evaluates `entity` after `component` was detached from it.
    pub fn entity_component_removed(&self, entity: &Entity, component: &AnyComponent) {
        self.entity_changed(entity, &EntityChange::ComponentRemoved(component.clone()));
    }

    /// Re-evaluates `entity` after `tag` was attached to it.
    pub fn entity_tag_added(&self, entity: &Entity, tag: &Tag) {
        self.entity_changed(entity, &EntityChange::TagAdded(tag.clone()));
    }

    /// Re-evaluates `entity` after `tag` was detached from it.
    pub fn entity_tag_removed(&self, entity: &Entity, tag: &Tag) {
        self.entity_changed(entity, &EntityChange::TagRemoved(tag.clone()));
    }

    /// Re-evaluates `entity` after an in-place change.
    pub fn entity_invalidated(&self, entity: &Entity) {
        self.entity_changed(entity, &EntityChange::Invalidated);
    }

    /// Re-evaluates `entity` after `change` and updates membership.
    ///
    /// Fires `on_entity_added` on an absent→present flip and
    /// `on_entity_removed` on present→absent; otherwise nothing. Inert
    /// queries ignore the call.
    pub fn entity_changed(&self, entity: &Entity, change: &EntityChange) {
        if self.state() == QueryState::Inert {
            return;
        }

        let matches = self.matches(entity);
        match (self.has(entity), matches) {
            (false, true) => {
                self.insert(entity);
                tracing::trace!(entity = %entity.id(), "query gained entity");
                self.announce_added(entity, Some(change));
            }
            (true, false) => {
                self.take(entity);
                tracing::trace!(entity = %entity.id(), "query lost entity");
                self.announce_removed(entity, Some(change));
            }
            _ => {}
        }
    }

    fn insert(&self, entity: &Entity) {
        self.inner.entities.borrow_mut().push(entity.clone());
        self.inner.members.borrow_mut().insert(entity.id());
    }

    fn take(&self, entity: &Entity) -> bool {
        if !self.inner.members.borrow_mut().remove(&entity.id()) {
            return false;
        }
        let mut entities = self.inner.entities.borrow_mut();
        if let Some(index) = entities.iter().position(|e| e == entity) {
            entities.remove(index);
        }
        true
    }

    fn announce_added(&self, entity: &Entity, change: Option<&EntityChange>) {
        if !self.inner.on_entity_added.is_empty() {
            let snapshot = EntitySnapshot::capture(entity, change);
            self.inner.on_entity_added.emit(&snapshot);
        }
    }

    fn announce_removed(&self, entity: &Entity, change: Option<&EntityChange>) {
        if !self.inner.on_entity_removed.is_empty() {
            let snapshot = EntitySnapshot::capture(entity, change);
            self.inner.on_entity_removed.emit(&snapshot);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Copy of the result list, in insertion order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.inner.entities.borrow().clone()
    }

    /// Number of matched entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entities.borrow().len()
    }

    /// `true` if nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entities.borrow().is_empty()
    }

    /// `true` if `entity` is in the result list.
    #[must_use]
    pub fn has(&self, entity: &Entity) -> bool {
        self.inner.members.borrow().contains(&entity.id())
    }

    /// The oldest match.
    #[must_use]
    pub fn first(&self) -> Option<Entity> {
        self.inner.entities.borrow().first().cloned()
    }

    /// The newest match.
    #[must_use]
    pub fn last(&self) -> Option<Entity> {
        self.inner.entities.borrow().last().cloned()
    }

    /// The first match accepted by `predicate`.
    pub fn find<F>(&self, mut predicate: F) -> Option<Entity>
    where
        F: FnMut(&Entity) -> bool,
    {
        self.entities().into_iter().find(|e| predicate(e))
    }

    /// Every match accepted by `predicate`, in list order.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<Entity>
    where
        F: FnMut(&Entity) -> bool,
    {
        self.entities().into_iter().filter(|e| predicate(e)).collect()
    }

    /// Number of matches accepted by `predicate`.
    pub fn count_by<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&Entity) -> bool,
    {
        self.entities().iter().filter(|e| predicate(e)).count()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("state", &self.state())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentKind};

    struct Position;
    impl Component for Position {}

    struct View;
    impl Component for View {}

    struct Damage;
    impl Component for Damage {
        const KIND: ComponentKind = ComponentKind::Linked;
    }

    fn counter(signal: &Signal<EntitySnapshot>) -> Rc<Cell<usize>> {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        signal.connect(move |_| sink.set(sink.get() + 1));
        hits
    }

    #[test]
    fn test_match_entities_preserves_order() {
        let query = Query::new(|e| e.has::<Position>());
        let entities = vec![
            Entity::new().with(Position),
            Entity::new().with(View),
            Entity::new().with(Position).with(View),
        ];

        query.match_entities(&entities);
        assert_eq!(query.entities(), vec![entities[0].clone(), entities[2].clone()]);
        assert_eq!(query.state(), QueryState::Unregistered);
    }

    #[test]
    fn test_match_entities_resets_list() {
        let query = Query::new(|e| e.has::<Position>());
        let a = Entity::new().with(Position);
        let b = Entity::new().with(Position);

        query.match_entities([&a]);
        query.match_entities([&b]);
        assert_eq!(query.entities(), vec![b]);
    }

    #[test]
    fn test_direct_component_added_flips_membership() {
        let query = Query::new(|e| e.has_all::<(View, Position)>());
        let added = counter(query.on_entity_added());
        let entity = Entity::new().with(View);
        query.match_entities([&entity]);

        entity.add(Position);
        let position = entity.get_id(crate::ComponentTypeId::of::<Position>()).unwrap();
        query.entity_component_added(&entity, &position);
        query.entity_component_added(&entity, &position);

        assert_eq!(added.get(), 1);
        assert!(query.has(&entity));
    }

    #[test]
    fn test_linked_boundary_semantics() {
        let query = Query::new(|e| e.has::<Damage>());
        let added = counter(query.on_entity_added());
        let removed = counter(query.on_entity_removed());
        let entity = Entity::new().with(Damage);
        query.match_entities([&entity]);
        assert_eq!(added.get(), 1);

        for _ in 0..3 {
            entity.append(Damage);
            let newest = entity.linked::<Damage>().pop().unwrap();
            query.entity_component_added(&entity, &AnyComponent::from_shared(newest));
        }
        assert_eq!(added.get(), 1);

        while entity.has::<Damage>() {
            let damage = entity.withdraw::<Damage>().unwrap();
            query.entity_component_removed(&entity, &AnyComponent::from_shared(damage));
        }
        assert_eq!(removed.get(), 1);
        assert!(query.is_empty());
    }

    #[test]
    fn test_direct_tag_changes() {
        let tag = Tag::from("boss");
        let query = Query::new(|e| e.has_tag("boss"));
        let entity = Entity::new();
        query.match_entities([&entity]);

        entity.add_tag("boss");
        query.entity_tag_added(&entity, &tag);
        assert!(query.has(&entity));

        entity.remove_tag("boss");
        query.entity_tag_removed(&entity, &tag);
        assert!(query.is_empty());
    }

    #[test]
    fn test_inert_query_ignores_events() {
        let query = Query::new(|e| e.has::<View>());
        let entity = Entity::new().with(View);
        query.set_state(QueryState::Inert);

        query.entity_invalidated(&entity);
        assert!(query.is_empty());
    }

    #[test]
    fn test_read_accessors() {
        let query = Query::new(|e| e.has::<Position>());
        assert!(query.first().is_none());
        assert!(query.last().is_none());
        assert_eq!(query.count_by(|_| true), 0);

        let entities = vec![
            Entity::new().with(Position),
            Entity::new().with(Position).with(View),
            Entity::new().with(Position).with(View),
        ];
        query.match_entities(&entities);

        assert_eq!(query.first(), Some(entities[0].clone()));
        assert_eq!(query.last(), Some(entities[2].clone()));
        assert_eq!(query.find(|e| e.has::<View>()), Some(entities[1].clone()));
        assert_eq!(query.filter(|e| e.has::<View>()).len(), 2);
        assert_eq!(query.count_by(|e| e.has::<View>()), 2);
        assert_eq!(query.len(), 3);
    }

    #[test]
    fn test_clear_is_silent() {
        let query = Query::new(|_| true);
        let removed = counter(query.on_entity_removed());
        query.match_entities(&[Entity::new()]);

        query.clear();
        assert!(query.is_empty());
        assert_eq!(removed.get(), 0);
    }
}
