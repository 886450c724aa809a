//! # Entity Management
//!
//! An [`Entity`] is an identity plus its component storage. The handle is
//! reference counted: clones refer to the same entity, and equality is by
//! [`EntityId`].
//!
//! Every mutation follows the same two steps:
//! 1. mutate storage and release the borrow
//! 2. emit `on_component_added` / `on_component_removed`
//!
//! so a listener always sees fully settled state and may itself mutate the
//! entity.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_signal::Signal;

use crate::component::{AnyComponent, Component, ComponentKind, ComponentSet, ComponentTypeId};
use crate::snapshot::EntityView;
use crate::storage::ComponentStorage;
use crate::tag::Tag;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// What changed on an entity.
#[derive(Clone, Debug)]
pub enum EntityChange {
    /// A component instance was attached (simple add, replace, or append).
    ComponentAdded(AnyComponent),
    /// A component instance was detached. For linked types this is only
    /// reported when the chain becomes empty.
    ComponentRemoved(AnyComponent),
    /// A whole linked chain was detached at once, oldest first. Never empty.
    ChainRemoved(Vec<AnyComponent>),
    /// A tag was attached.
    TagAdded(Tag),
    /// A tag was detached.
    TagRemoved(Tag),
    /// State changed in place; no component delta.
    Invalidated,
}

impl EntityChange {
    /// The component instance involved, if any.
    ///
    /// For a chain removal this is the newest instance of the chain.
    #[must_use]
    pub fn component(&self) -> Option<&AnyComponent> {
        match self {
            Self::ComponentAdded(c) | Self::ComponentRemoved(c) => Some(c),
            Self::ChainRemoved(chain) => chain.last(),
            _ => None,
        }
    }

    /// The component type involved, if any.
    #[must_use]
    pub fn component_type(&self) -> Option<ComponentTypeId> {
        self.component().map(AnyComponent::component_type)
    }

    /// The tag involved, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Self::TagAdded(t) | Self::TagRemoved(t) => Some(t),
            _ => None,
        }
    }
}

/// Payload of every entity-level signal.
#[derive(Clone, Debug)]
pub struct EntityEvent {
    /// The entity that changed.
    pub entity: Entity,
    /// The change, already applied to `entity`.
    pub change: EntityChange,
}

struct EntityInner {
    id: EntityId,
    storage: RefCell<ComponentStorage>,
    on_component_added: Signal<EntityEvent>,
    on_component_removed: Signal<EntityEvent>,
    on_invalidated: Signal<EntityEvent>,
}

/// Handle to an entity and its components.
///
/// # Example
///
/// ```rust
/// use kestrel_ecs::{Component, Entity};
///
/// #[derive(Default)]
/// struct Position {
///     y: f32,
/// }
/// impl Component for Position {}
///
/// let entity = Entity::new().with(Position::default()).with_tag("player");
/// assert!(entity.has::<Position>());
///
/// if let Some(position) = entity.get::<Position>() {
///     position.borrow_mut().y = 150.0;
/// }
/// // In-place edits are invisible to queries until the entity is invalidated.
/// entity.invalidate();
/// ```
#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

impl Entity {
    /// Creates an entity with no components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EntityInner {
                id: EntityId::next(),
                storage: RefCell::new(ComponentStorage::default()),
                on_component_added: Signal::new(),
                on_component_removed: Signal::new(),
                on_invalidated: Signal::new(),
            }),
        }
    }

    /// The entity's identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.inner.id
    }

    /// Fired after a component or tag is attached.
    #[must_use]
    pub fn on_component_added(&self) -> &Signal<EntityEvent> {
        &self.inner.on_component_added
    }

    /// Fired after a component or tag is detached.
    #[must_use]
    pub fn on_component_removed(&self) -> &Signal<EntityEvent> {
        &self.inner.on_component_removed
    }

    /// Fired by [`Entity::invalidate`].
    #[must_use]
    pub fn on_invalidated(&self) -> &Signal<EntityEvent> {
        &self.inner.on_invalidated
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Attaches a component.
    ///
    /// A simple component replaces any existing instance of its type: the
    /// storage is swapped first, then `removed(old)` and `added(new)` fire in
    /// that order. A linked component is appended (see [`Entity::append`]).
    pub fn add<T: Component>(&self, component: T) -> &Self {
        self.add_any(AnyComponent::new(component))
    }

    /// Attaches an already shared instance, e.g. one returned by
    /// [`Entity::remove`] on another entity.
    pub fn add_shared<T: Component>(&self, component: Rc<RefCell<T>>) -> &Self {
        self.add_any(AnyComponent::from_shared(component))
    }

    /// Type-erased [`Entity::add`].
    pub fn add_any(&self, component: AnyComponent) -> &Self {
        if component.kind() == ComponentKind::Linked {
            return self.append_any(component);
        }

        let replaced = self.inner.storage.borrow_mut().insert(component.clone());
        if let Some(old) = replaced {
            self.emit_removed(EntityChange::ComponentRemoved(old));
        }
        self.emit_added(EntityChange::ComponentAdded(component));
        self
    }

    /// By-value [`Entity::add`], for construction chains.
    #[must_use]
    pub fn with<T: Component>(self, component: T) -> Self {
        self.add(component);
        self
    }

    /// Appends a linked component to the end of its chain.
    ///
    /// Fires `on_component_added` with this instance on every append, even
    /// when the chain already had instances. Appending a simple component is
    /// the same as [`Entity::add`].
    pub fn append<T: Component>(&self, component: T) -> &Self {
        self.append_any(AnyComponent::new(component))
    }

    /// Type-erased [`Entity::append`].
    pub fn append_any(&self, component: AnyComponent) -> &Self {
        if component.kind() == ComponentKind::Simple {
            return self.add_any(component);
        }

        self.inner.storage.borrow_mut().push_linked(component.clone());
        self.emit_added(EntityChange::ComponentAdded(component));
        self
    }

    /// Detaches the component of type `T`.
    ///
    /// For a simple type this returns the removed instance. For a linked
    /// type the whole chain is dropped, a single [`EntityChange::ChainRemoved`]
    /// carrying every instance is reported, and the newest instance is
    /// returned. Returns `None` (and fires nothing) if the
    /// type is absent.
    pub fn remove<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        self.remove_id(ComponentTypeId::of::<T>())
            .and_then(|c| c.downcast::<T>())
    }

    /// Type-erased [`Entity::remove`].
    pub fn remove_id(&self, id: ComponentTypeId) -> Option<AnyComponent> {
        let taken = self.inner.storage.borrow_mut().take(id);
        if let Some(component) = taken {
            self.emit_removed(EntityChange::ComponentRemoved(component.clone()));
            return Some(component);
        }

        let chain = self.inner.storage.borrow_mut().take_chain(id)?;
        let last = chain.back().cloned()?;
        self.emit_removed(EntityChange::ChainRemoved(chain.into()));
        Some(last)
    }

    /// Removes and returns the oldest instance of linked type `T`.
    ///
    /// `on_component_removed` fires only if this empties the chain; while
    /// instances remain the type is still present and nothing is reported.
    /// Returns `None` for an empty chain or a simple type.
    pub fn withdraw<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        self.withdraw_id(ComponentTypeId::of::<T>())
            .and_then(|c| c.downcast::<T>())
    }

    /// Type-erased [`Entity::withdraw`].
    pub fn withdraw_id(&self, id: ComponentTypeId) -> Option<AnyComponent> {
        let (component, emptied) = self.inner.storage.borrow_mut().pop_linked(id)?;
        if emptied {
            self.emit_removed(EntityChange::ComponentRemoved(component.clone()));
        }
        Some(component)
    }

    /// Removes one specific linked instance, wherever it sits in the chain.
    ///
    /// Same reporting rule as [`Entity::withdraw`]. Returns `false` if the
    /// instance is not attached to this entity.
    pub fn pick<T: Component>(&self, component: &Rc<RefCell<T>>) -> bool {
        self.pick_any(&AnyComponent::from_shared(Rc::clone(component)))
    }

    /// Type-erased [`Entity::pick`].
    pub fn pick_any(&self, component: &AnyComponent) -> bool {
        let removed = self.inner.storage.borrow_mut().remove_linked(component);
        match removed {
            Some(emptied) => {
                if emptied {
                    self.emit_removed(EntityChange::ComponentRemoved(component.clone()));
                }
                true
            }
            None => false,
        }
    }

    /// Attaches a tag. Nothing fires if the tag is already present.
    pub fn add_tag(&self, tag: impl Into<Tag>) -> &Self {
        let tag = tag.into();
        let inserted = self.inner.storage.borrow_mut().insert_tag(tag.clone());
        if inserted {
            self.emit_added(EntityChange::TagAdded(tag));
        }
        self
    }

    /// By-value [`Entity::add_tag`], for construction chains.
    #[must_use]
    pub fn with_tag(self, tag: impl Into<Tag>) -> Self {
        self.add_tag(tag);
        self
    }

    /// Detaches a tag. Returns `false` (and fires nothing) if it was absent.
    pub fn remove_tag(&self, tag: impl Into<Tag>) -> bool {
        let tag = tag.into();
        let removed = self.inner.storage.borrow_mut().remove_tag(&tag);
        if removed {
            self.emit_removed(EntityChange::TagRemoved(tag));
        }
        removed
    }

    /// Re-announces the entity without a component delta.
    ///
    /// Use after mutating a component in place so value-dependent query
    /// predicates are evaluated again.
    pub fn invalidate(&self) {
        let event = self.event(EntityChange::Invalidated);
        self.inner.on_invalidated.emit(&event);
    }

    /// Detaches every component, linked chain and tag.
    ///
    /// Simple components are reported first, then one removal per linked
    /// chain, then tags.
    pub fn clear(&self) {
        let drained = self.inner.storage.borrow_mut().drain();
        for component in drained.components {
            self.emit_removed(EntityChange::ComponentRemoved(component));
        }
        for chain in drained.linked {
            if !chain.is_empty() {
                self.emit_removed(EntityChange::ChainRemoved(chain.into()));
            }
        }
        for tag in drained.tags {
            self.emit_removed(EntityChange::TagRemoved(tag));
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// `true` if a simple `T` is attached or the `T` chain is non-empty.
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.has_id(ComponentTypeId::of::<T>())
    }

    /// Type-erased [`Entity::has`].
    #[must_use]
    pub fn has_id(&self, id: ComponentTypeId) -> bool {
        self.inner.storage.borrow().contains(id)
    }

    /// `true` if every type in the tuple `S` is present.
    #[must_use]
    pub fn has_all<S: ComponentSet>(&self) -> bool {
        let storage = self.inner.storage.borrow();
        S::type_ids().into_iter().all(|id| storage.contains(id))
    }

    /// `true` if any type in the tuple `S` is present.
    #[must_use]
    pub fn has_any<S: ComponentSet>(&self) -> bool {
        let storage = self.inner.storage.borrow();
        S::type_ids().into_iter().any(|id| storage.contains(id))
    }

    /// `true` if the tag is attached.
    #[must_use]
    pub fn has_tag(&self, tag: impl Into<Tag>) -> bool {
        self.contains_tag(&tag.into())
    }

    pub(crate) fn contains_tag(&self, tag: &Tag) -> bool {
        self.inner.storage.borrow().has_tag(tag)
    }

    /// The simple component of type `T`.
    ///
    /// Linked types are not reachable through `get`; use
    /// [`Entity::linked`].
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        self.get_id(ComponentTypeId::of::<T>())
            .and_then(|c| c.downcast::<T>())
    }

    /// Type-erased [`Entity::get`].
    #[must_use]
    pub fn get_id(&self, id: ComponentTypeId) -> Option<AnyComponent> {
        self.inner.storage.borrow().get(id).cloned()
    }

    /// Every instance of linked type `T`, oldest first.
    #[must_use]
    pub fn linked<T: Component>(&self) -> Vec<Rc<RefCell<T>>> {
        self.inner
            .storage
            .borrow()
            .chain(ComponentTypeId::of::<T>())
            .filter_map(AnyComponent::downcast::<T>)
            .collect()
    }

    /// Number of instances of linked type `T`.
    #[must_use]
    pub fn linked_count<T: Component>(&self) -> usize {
        self.inner
            .storage
            .borrow()
            .chain_len(ComponentTypeId::of::<T>())
    }

    /// Every attached tag, in sorted order.
    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.inner.storage.borrow().tags().cloned().collect()
    }

    /// Ids of every present component type, ascending.
    #[must_use]
    pub fn component_ids(&self) -> Vec<ComponentTypeId> {
        self.inner.storage.borrow().component_ids()
    }

    /// `true` if no component, linked chain or tag is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.storage.borrow().is_empty()
    }

    /// Read-only copy of the current state.
    #[must_use]
    pub fn view(&self) -> EntityView {
        EntityView::new(self.id(), self.storage_copy())
    }

    pub(crate) fn storage_copy(&self) -> ComponentStorage {
        self.inner.storage.borrow().clone()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn event(&self, change: EntityChange) -> EntityEvent {
        EntityEvent {
            entity: self.clone(),
            change,
        }
    }

    fn emit_added(&self, change: EntityChange) {
        let event = self.event(change);
        self.inner.on_component_added.emit(&event);
    }

    fn emit_removed(&self, change: EntityChange) {
        let event = self.event(change);
        self.inner.on_component_removed.emit(&event);
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&'static str> = self
            .component_ids()
            .into_iter()
            .map(ComponentTypeId::name)
            .collect();
        f.debug_struct("Entity")
            .field("id", &self.inner.id)
            .field("components", &names)
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    struct View;
    impl Component for View {}

    struct Damage(u32);
    impl Component for Damage {
        const KIND: ComponentKind = ComponentKind::Linked;
    }

    /// Records "+Name" / "-Name" for every component signal.
    fn journal(entity: &Entity) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        entity.on_component_added().connect(move |event: &EntityEvent| {
            sink.borrow_mut().push(format!("+{}", label(&event.change)));
        });
        let sink = Rc::clone(&log);
        entity.on_component_removed().connect(move |event: &EntityEvent| {
            sink.borrow_mut().push(format!("-{}", label(&event.change)));
        });
        log
    }

    fn label(change: &EntityChange) -> String {
        match (change.component_type(), change.tag()) {
            (Some(id), _) => id.name().rsplit("::").next().unwrap_or_default().to_string(),
            (None, Some(tag)) => tag.to_string(),
            (None, None) => "?".to_string(),
        }
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Entity::new().id(), Entity::new().id());
    }

    #[test]
    fn test_add_get_remove() {
        let entity = Entity::new().with(Position { x: 1.0, y: 2.0 });
        assert!(entity.has::<Position>());
        assert!(!entity.has::<View>());
        assert_eq!(*entity.get::<Position>().unwrap().borrow(), Position { x: 1.0, y: 2.0 });

        let removed = entity.remove::<Position>().unwrap();
        assert_eq!(removed.borrow().x, 1.0);
        assert!(!entity.has::<Position>());
        assert!(entity.remove::<Position>().is_none());
    }

    #[test]
    fn test_readd_replaces_with_removed_then_added() {
        let entity = Entity::new();
        let log = journal(&entity);

        entity.add(Position { x: 0.0, y: 0.0 });
        entity.add(Position { x: 5.0, y: 0.0 });

        assert_eq!(*log.borrow(), vec!["+Position", "-Position", "+Position"]);
        assert_eq!(entity.component_ids().len(), 1);
        assert_eq!(entity.get::<Position>().unwrap().borrow().x, 5.0);
    }

    #[test]
    fn test_listener_sees_settled_state() {
        let entity = Entity::new().with(Position { x: 0.0, y: 0.0 });
        let seen = Rc::new(Cell::new(0.0_f32));
        let sink = Rc::clone(&seen);
        entity.on_component_removed().connect(move |event: &EntityEvent| {
            // The replaced instance is reported while the new one is stored.
            if let Some(current) = event.entity.get::<Position>() {
                sink.set(current.borrow().x);
            }
        });

        entity.add(Position { x: 9.0, y: 0.0 });
        assert_eq!(seen.get(), 9.0);
    }

    #[test]
    fn test_append_fires_every_time() {
        let entity = Entity::new();
        let log = journal(&entity);

        entity.append(Damage(1)).append(Damage(2)).append(Damage(3));

        assert_eq!(log.borrow().len(), 3);
        assert_eq!(entity.linked_count::<Damage>(), 3);
        assert!(entity.get::<Damage>().is_none());
    }

    #[test]
    fn test_withdraw_reports_only_final_removal() {
        let entity = Entity::new().with(Damage(1)).with(Damage(2)).with(Damage(3));
        let log = journal(&entity);

        assert_eq!(entity.withdraw::<Damage>().unwrap().borrow().0, 1);
        assert_eq!(entity.withdraw::<Damage>().unwrap().borrow().0, 2);
        assert!(log.borrow().is_empty());
        assert!(entity.has::<Damage>());

        assert_eq!(entity.withdraw::<Damage>().unwrap().borrow().0, 3);
        assert_eq!(*log.borrow(), vec!["-Damage"]);
        assert!(!entity.has::<Damage>());
        assert!(entity.withdraw::<Damage>().is_none());
    }

    #[test]
    fn test_withdraw_simple_type_is_noop() {
        let entity = Entity::new().with(View);
        assert!(entity.withdraw::<View>().is_none());
        assert!(entity.has::<View>());
    }

    #[test]
    fn test_remove_linked_drops_whole_chain() {
        let entity = Entity::new().with(Damage(1)).with(Damage(2));
        let log = journal(&entity);

        let last = entity.remove::<Damage>().unwrap();
        assert_eq!(last.borrow().0, 2);
        assert_eq!(*log.borrow(), vec!["-Damage"]);
        assert_eq!(entity.linked_count::<Damage>(), 0);
    }

    #[test]
    fn test_pick_specific_instance() {
        let entity = Entity::new().with(Damage(1)).with(Damage(2));
        let second = entity.linked::<Damage>().pop().unwrap();

        assert!(entity.pick(&second));
        assert!(!entity.pick(&second));
        let remaining: Vec<u32> = entity.linked::<Damage>().iter().map(|d| d.borrow().0).collect();
        assert_eq!(remaining, vec![1]);
    }

    #[test]
    fn test_tags() {
        let entity = Entity::new().with_tag(1_i64).with_tag("boss");
        let log = journal(&entity);

        entity.add_tag("boss");
        assert!(log.borrow().is_empty());

        assert!(entity.has_tag(1_i64));
        assert!(entity.remove_tag("boss"));
        assert!(!entity.remove_tag("boss"));
        assert_eq!(*log.borrow(), vec!["-'boss'"]);
        assert_eq!(entity.tags(), vec![Tag::Int(1)]);
    }

    #[test]
    fn test_has_all_and_any() {
        let entity = Entity::new().with(Position { x: 0.0, y: 0.0 }).with(Damage(1));
        assert!(entity.has_all::<(Position, Damage)>());
        assert!(!entity.has_all::<(Position, View)>());
        assert!(entity.has_any::<(View, Damage)>());
        assert!(!entity.has_any::<(View,)>());
    }

    #[test]
    fn test_invalidate_fires_without_delta() {
        let entity = Entity::new();
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        entity.on_invalidated().connect(move |event: &EntityEvent| {
            assert!(matches!(event.change, EntityChange::Invalidated));
            sink.set(sink.get() + 1);
        });

        entity.invalidate();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_clear_reports_everything() {
        let entity = Entity::new()
            .with(View)
            .with(Damage(1))
            .with(Damage(2))
            .with_tag("x");
        let log = journal(&entity);

        entity.clear();
        assert!(entity.is_empty());
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_handler_can_mutate_entity() {
        let entity = Entity::new();
        entity.on_component_added().connect(|event: &EntityEvent| {
            if event.change.component_type() == Some(ComponentTypeId::of::<View>()) {
                event.entity.add(Position { x: 0.0, y: 0.0 });
            }
        });

        entity.add(View);
        assert!(entity.has_all::<(View, Position)>());
    }
}
