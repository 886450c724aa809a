//! # Entity Snapshots
//!
//! Queries report membership changes with a before/after pair. The "after"
//! view is a copy of the entity's storage at notification time; the
//! "before" view is the same copy with the triggering change reverted.
//!
//! Views record *which* instances were attached. Instances themselves are
//! shared, so field values read through a view are the live values.

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::{AnyComponent, Component, ComponentSet, ComponentTypeId};
use crate::entity::{Entity, EntityChange, EntityId};
use crate::storage::ComponentStorage;
use crate::tag::Tag;

/// Read-only view of an entity's attachments at one instant.
#[derive(Clone, Debug)]
pub struct EntityView {
    id: EntityId,
    storage: ComponentStorage,
}

impl EntityView {
    pub(crate) fn new(id: EntityId, storage: ComponentStorage) -> Self {
        Self { id, storage }
    }

    /// Id of the viewed entity.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// `true` if `T` was present.
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.storage.contains(ComponentTypeId::of::<T>())
    }

    /// `true` if the type with `id` was present.
    #[must_use]
    pub fn has_id(&self, id: ComponentTypeId) -> bool {
        self.storage.contains(id)
    }

    /// `true` if every type in `S` was present.
    #[must_use]
    pub fn has_all<S: ComponentSet>(&self) -> bool {
        S::type_ids().into_iter().all(|id| self.storage.contains(id))
    }

    /// `true` if any type in `S` was present.
    #[must_use]
    pub fn has_any<S: ComponentSet>(&self) -> bool {
        S::type_ids().into_iter().any(|id| self.storage.contains(id))
    }

    /// `true` if the tag was attached.
    #[must_use]
    pub fn has_tag(&self, tag: impl Into<Tag>) -> bool {
        self.storage.has_tag(&tag.into())
    }

    /// The simple `T` instance that was attached.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        self.storage
            .get(ComponentTypeId::of::<T>())
            .and_then(AnyComponent::downcast::<T>)
    }

    /// The linked `T` instances that were attached, oldest first.
    #[must_use]
    pub fn linked<T: Component>(&self) -> Vec<Rc<RefCell<T>>> {
        self.storage
            .chain(ComponentTypeId::of::<T>())
            .filter_map(AnyComponent::downcast::<T>)
            .collect()
    }

    /// The tags that were attached, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<Tag> {
        self.storage.tags().cloned().collect()
    }

    /// Ids of the component types that were present, ascending.
    #[must_use]
    pub fn component_ids(&self) -> Vec<ComponentTypeId> {
        self.storage.component_ids()
    }
}

/// Before/after pair delivered by query membership signals.
#[derive(Clone, Debug)]
pub struct EntitySnapshot {
    entity: Entity,
    change: Option<EntityChange>,
    previous: EntityView,
    current: EntityView,
}

impl EntitySnapshot {
    /// Captures `entity` as it is now, and as it was before `change`.
    ///
    /// With no change (engine registration, explicit matching) both views
    /// are equal.
    pub(crate) fn capture(entity: &Entity, change: Option<&EntityChange>) -> Self {
        let current = entity.storage_copy();
        let mut previous = current.clone();
        if let Some(change) = change {
            previous.revert(change);
        }
        Self {
            entity: entity.clone(),
            change: change.cloned(),
            previous: EntityView::new(entity.id(), previous),
            current: EntityView::new(entity.id(), current),
        }
    }

    /// The live entity.
    #[must_use]
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// The change that caused the membership flip, if any.
    #[must_use]
    pub fn change(&self) -> Option<&EntityChange> {
        self.change.as_ref()
    }

    /// State immediately before the change.
    #[must_use]
    pub fn previous(&self) -> &EntityView {
        &self.previous
    }

    /// State immediately after the change.
    #[must_use]
    pub fn current(&self) -> &EntityView {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;

    struct Position;
    impl Component for Position {}

    struct View;
    impl Component for View {}

    struct Hit;
    impl Component for Hit {
        const KIND: ComponentKind = ComponentKind::Linked;
    }

    #[test]
    fn test_capture_after_add() {
        let entity = Entity::new().with(View).with(Position);
        let added = entity.get_id(ComponentTypeId::of::<Position>()).unwrap();

        let snapshot = EntitySnapshot::capture(&entity, Some(&EntityChange::ComponentAdded(added)));
        assert!(snapshot.current().has_all::<(View, Position)>());
        assert!(snapshot.previous().has::<View>());
        assert!(!snapshot.previous().has::<Position>());
    }

    #[test]
    fn test_capture_after_remove() {
        let entity = Entity::new().with(View).with(Position);
        let removed = entity.remove_id(ComponentTypeId::of::<Position>()).unwrap();

        let snapshot =
            EntitySnapshot::capture(&entity, Some(&EntityChange::ComponentRemoved(removed)));
        assert!(snapshot.previous().has_all::<(View, Position)>());
        assert!(!snapshot.current().has::<Position>());
    }

    #[test]
    fn test_capture_after_append_keeps_older_instances() {
        let entity = Entity::new().with(Hit).with(Hit);
        let newest = entity.linked::<Hit>().pop().unwrap();

        let snapshot = EntitySnapshot::capture(
            &entity,
            Some(&EntityChange::ComponentAdded(AnyComponent::from_shared(newest))),
        );
        assert_eq!(snapshot.current().linked::<Hit>().len(), 2);
        assert_eq!(snapshot.previous().linked::<Hit>().len(), 1);
    }

    #[test]
    fn test_capture_after_chain_removal_restores_every_instance() {
        let entity = Entity::new().with(View).with(Hit).with(Hit).with(Hit);
        let change = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&change);
        entity
            .on_component_removed()
            .connect(move |event| *sink.borrow_mut() = Some(event.change.clone()));

        entity.remove::<Hit>();
        let change = change.borrow_mut().take().unwrap();
        assert!(matches!(&change, EntityChange::ChainRemoved(chain) if chain.len() == 3));

        let snapshot = EntitySnapshot::capture(&entity, Some(&change));
        assert_eq!(snapshot.previous().linked::<Hit>().len(), 3);
        assert!(!snapshot.current().has::<Hit>());
        assert!(snapshot.previous().has::<View>());
    }

    #[test]
    fn test_capture_without_change() {
        let entity = Entity::new().with(View).with_tag("t");
        let snapshot = EntitySnapshot::capture(&entity, None);
        assert!(snapshot.change().is_none());
        assert_eq!(snapshot.previous().component_ids(), snapshot.current().component_ids());
        assert!(snapshot.previous().has_tag("t"));
        assert_eq!(snapshot.entity(), &entity);
    }
}
