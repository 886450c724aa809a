//! # Component Storage
//!
//! Per-entity, type-keyed storage. This is plain data: it never emits
//! events. [`Entity`](crate::Entity) wraps it, performs the mutation, drops
//! the borrow and only then publishes signals.
//!
//! The storage holds:
//! - one instance per simple component type
//! - a FIFO chain per linked component type (never empty while present)
//! - a set of tags
//!
//! Cloning a storage is shallow: instances are shared handles, so a clone is
//! a cheap record of *which* instances were attached at a given instant.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::component::{AnyComponent, ComponentKind, ComponentTypeId};
use crate::entity::EntityChange;
use crate::tag::Tag;

/// Type-keyed component and tag storage for one entity.
#[derive(Clone, Debug, Default)]
pub(crate) struct ComponentStorage {
    components: HashMap<ComponentTypeId, AnyComponent>,
    linked: HashMap<ComponentTypeId, VecDeque<AnyComponent>>,
    tags: BTreeSet<Tag>,
}

/// Everything removed from a storage by [`ComponentStorage::drain`].
pub(crate) struct DrainedStorage {
    pub components: Vec<AnyComponent>,
    pub linked: Vec<VecDeque<AnyComponent>>,
    pub tags: Vec<Tag>,
}

impl ComponentStorage {
    /// Stores a simple component, returning the instance it replaced.
    pub fn insert(&mut self, component: AnyComponent) -> Option<AnyComponent> {
        debug_assert_eq!(component.kind(), ComponentKind::Simple);
        self.components.insert(component.component_type(), component)
    }

    /// Removes the simple component of type `id`.
    pub fn take(&mut self, id: ComponentTypeId) -> Option<AnyComponent> {
        self.components.remove(&id)
    }

    /// Appends to the chain for the instance's type.
    pub fn push_linked(&mut self, component: AnyComponent) {
        debug_assert_eq!(component.kind(), ComponentKind::Linked);
        self.linked
            .entry(component.component_type())
            .or_default()
            .push_back(component);
    }

    /// Removes the oldest instance of the chain for `id`.
    ///
    /// The flag is `true` when the chain became empty (and was dropped).
    pub fn pop_linked(&mut self, id: ComponentTypeId) -> Option<(AnyComponent, bool)> {
        let chain = self.linked.get_mut(&id)?;
        let component = chain.pop_front()?;
        let emptied = chain.is_empty();
        if emptied {
            self.linked.remove(&id);
        }
        Some((component, emptied))
    }

    /// Removes one specific linked instance, matched by identity.
    ///
    /// Returns `None` if it is not attached, otherwise whether the chain
    /// became empty.
    pub fn remove_linked(&mut self, component: &AnyComponent) -> Option<bool> {
        let id = component.component_type();
        let chain = self.linked.get_mut(&id)?;
        let index = chain.iter().position(|c| c.ptr_eq(component))?;
        chain.remove(index);
        let emptied = chain.is_empty();
        if emptied {
            self.linked.remove(&id);
        }
        Some(emptied)
    }

    /// Removes the whole chain for `id`.
    pub fn take_chain(&mut self, id: ComponentTypeId) -> Option<VecDeque<AnyComponent>> {
        self.linked.remove(&id)
    }

    /// `true` if a simple component of `id` exists or its chain is non-empty.
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.components.contains_key(&id) || self.linked.contains_key(&id)
    }

    pub fn get(&self, id: ComponentTypeId) -> Option<&AnyComponent> {
        self.components.get(&id)
    }

    pub fn chain(&self, id: ComponentTypeId) -> impl Iterator<Item = &AnyComponent> {
        self.linked.get(&id).into_iter().flatten()
    }

    pub fn chain_len(&self, id: ComponentTypeId) -> usize {
        self.linked.get(&id).map_or(0, VecDeque::len)
    }

    pub fn insert_tag(&mut self, tag: Tag) -> bool {
        self.tags.insert(tag)
    }

    pub fn remove_tag(&mut self, tag: &Tag) -> bool {
        self.tags.remove(tag)
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Ids of every present component type, simple and linked, ascending.
    pub fn component_ids(&self) -> Vec<ComponentTypeId> {
        let mut ids: Vec<ComponentTypeId> = self
            .components
            .keys()
            .chain(self.linked.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.linked.is_empty() && self.tags.is_empty()
    }

    /// Empties the storage, returning what it held in id order.
    pub fn drain(&mut self) -> DrainedStorage {
        let mut components: Vec<AnyComponent> =
            self.components.drain().map(|(_, c)| c).collect();
        components.sort_by_key(AnyComponent::component_type);

        let mut linked: Vec<(ComponentTypeId, VecDeque<AnyComponent>)> =
            self.linked.drain().collect();
        linked.sort_by_key(|(id, _)| *id);

        DrainedStorage {
            components,
            linked: linked.into_iter().map(|(_, chain)| chain).collect(),
            tags: std::mem::take(&mut self.tags).into_iter().collect(),
        }
    }

    /// Undoes `change`, turning a post-change copy into the pre-change state.
    pub fn revert(&mut self, change: &EntityChange) {
        match change {
            EntityChange::ComponentAdded(component) => match component.kind() {
                ComponentKind::Simple => {
                    let id = component.component_type();
                    if self.get(id).is_some_and(|current| current.ptr_eq(component)) {
                        self.components.remove(&id);
                    }
                }
                ComponentKind::Linked => {
                    self.remove_linked(component);
                }
            },
            EntityChange::ComponentRemoved(component) => match component.kind() {
                ComponentKind::Simple => {
                    self.components
                        .insert(component.component_type(), component.clone());
                }
                ComponentKind::Linked => {
                    self.linked
                        .entry(component.component_type())
                        .or_default()
                        .push_front(component.clone());
                }
            },
            EntityChange::ChainRemoved(chain) => {
                if let Some(id) = chain.first().map(AnyComponent::component_type) {
                    let restored = self.linked.entry(id).or_default();
                    for component in chain.iter().rev() {
                        restored.push_front(component.clone());
                    }
                }
            }
            EntityChange::TagAdded(tag) => {
                self.tags.remove(tag);
            }
            EntityChange::TagRemoved(tag) => {
                self.tags.insert(tag.clone());
            }
            EntityChange::Invalidated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    struct Armor;
    impl Component for Armor {}

    struct Burn(u8);
    impl Component for Burn {
        const KIND: ComponentKind = ComponentKind::Linked;
    }

    #[test]
    fn test_insert_replaces() {
        let mut storage = ComponentStorage::default();
        let first = AnyComponent::new(Armor);
        assert!(storage.insert(first.clone()).is_none());

        let replaced = storage.insert(AnyComponent::new(Armor)).unwrap();
        assert!(replaced.ptr_eq(&first));
        assert!(storage.contains(ComponentTypeId::of::<Armor>()));
    }

    #[test]
    fn test_chain_is_fifo_and_drops_when_empty() {
        let mut storage = ComponentStorage::default();
        let id = ComponentTypeId::of::<Burn>();
        let a = AnyComponent::new(Burn(1));
        let b = AnyComponent::new(Burn(2));
        storage.push_linked(a.clone());
        storage.push_linked(b.clone());
        assert_eq!(storage.chain_len(id), 2);

        let (first, emptied) = storage.pop_linked(id).unwrap();
        assert!(first.ptr_eq(&a));
        assert!(!emptied);
        assert!(storage.contains(id));

        let (second, emptied) = storage.pop_linked(id).unwrap();
        assert!(second.ptr_eq(&b));
        assert!(emptied);
        assert!(!storage.contains(id));
        assert!(storage.pop_linked(id).is_none());
    }

    #[test]
    fn test_remove_linked_by_identity() {
        let mut storage = ComponentStorage::default();
        let a = AnyComponent::new(Burn(1));
        let b = AnyComponent::new(Burn(2));
        storage.push_linked(a.clone());
        storage.push_linked(b.clone());

        assert_eq!(storage.remove_linked(&b), Some(false));
        assert_eq!(storage.remove_linked(&b), None);
        assert_eq!(storage.remove_linked(&a), Some(true));
    }

    #[test]
    fn test_revert_restores_previous_state() {
        let mut storage = ComponentStorage::default();
        let armor = AnyComponent::new(Armor);
        storage.insert(armor.clone());
        storage.insert_tag(Tag::from("hero"));

        let mut previous = storage.clone();
        previous.revert(&EntityChange::ComponentAdded(armor.clone()));
        previous.revert(&EntityChange::TagAdded(Tag::from("hero")));
        assert!(previous.is_empty());

        let burn = AnyComponent::new(Burn(9));
        let mut previous = storage.clone();
        previous.revert(&EntityChange::ComponentRemoved(burn));
        assert_eq!(previous.chain_len(ComponentTypeId::of::<Burn>()), 1);
        assert!(storage.chain(ComponentTypeId::of::<Burn>()).next().is_none());
    }

    #[test]
    fn test_drain_empties_storage() {
        let mut storage = ComponentStorage::default();
        storage.insert(AnyComponent::new(Armor));
        storage.push_linked(AnyComponent::new(Burn(1)));
        storage.insert_tag(Tag::from(3_i64));

        let drained = storage.drain();
        assert_eq!(drained.components.len(), 1);
        assert_eq!(drained.linked.len(), 1);
        assert_eq!(drained.tags, vec![Tag::Int(3)]);
        assert!(storage.is_empty());
    }
}
