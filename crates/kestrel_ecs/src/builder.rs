//! # Query Builder
//!
//! Accumulates required component types and tags with set semantics and
//! compiles them into one predicate: "has every type AND every tag".

use std::collections::BTreeSet;

use crate::component::{Component, ComponentTypeId};
use crate::query::Query;
use crate::tag::Tag;

/// Builder for "contains all of" queries.
///
/// # Example
///
/// ```rust
/// use kestrel_ecs::{Component, Entity, QueryBuilder};
///
/// struct Position;
/// impl Component for Position {}
///
/// let query = QueryBuilder::new()
///     .contains::<Position>()
///     .contains::<Position>()
///     .contains_tag("enemy")
///     .build();
///
/// query.match_entities(&[
///     Entity::new().with(Position).with_tag("enemy"),
///     Entity::new().with(Position),
/// ]);
/// assert_eq!(query.len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    components: BTreeSet<ComponentTypeId>,
    tags: BTreeSet<Tag>,
}

impl QueryBuilder {
    /// Creates a builder with no requirements.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires component type `T`.
    #[must_use]
    pub fn contains<T: Component>(self) -> Self {
        self.contains_id(ComponentTypeId::of::<T>())
    }

    /// Requires the component type with `id`.
    #[must_use]
    pub fn contains_id(mut self, id: ComponentTypeId) -> Self {
        self.components.insert(id);
        self
    }

    /// Requires a tag.
    #[must_use]
    pub fn contains_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Requires every tag in `tags`.
    #[must_use]
    pub fn contains_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Tag>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// The required component types.
    #[must_use]
    pub fn components(&self) -> &BTreeSet<ComponentTypeId> {
        &self.components
    }

    /// The required tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    /// Compiles the requirements into a new, unregistered query.
    ///
    /// With no requirements every entity matches.
    #[must_use]
    pub fn build(&self) -> Query {
        let components: Vec<ComponentTypeId> = self.components.iter().copied().collect();
        let tags: Vec<Tag> = self.tags.iter().cloned().collect();
        Query::new(move |entity| {
            components.iter().all(|&id| entity.has_id(id))
                && tags.iter().all(|tag| entity.contains_tag(tag))
        })
    }
}
