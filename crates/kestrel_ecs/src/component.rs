//! # Component System
//!
//! Components are plain Rust types attached to entities. Each type is given
//! a compact [`ComponentTypeId`] the first time it is used, and that id is
//! what storage, queries and the builder key on.
//!
//! Two kinds exist:
//! - **Simple**: at most one live instance per entity
//! - **Linked**: an ordered chain of instances per entity, for repeatable
//!   data such as stacking damage events

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::rc::Rc;
use std::sync::OnceLock;

use parking_lot::RwLock;

/// Storage kind of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// One instance per entity; re-adding replaces it.
    Simple,
    /// Ordered chain of instances per entity.
    Linked,
}

/// Marker trait for ECS components.
///
/// # Example
///
/// ```rust
/// use kestrel_ecs::{Component, ComponentKind};
///
/// struct Position {
///     x: f32,
///     y: f32,
/// }
///
/// impl Component for Position {}
///
/// struct Damage(u32);
///
/// impl Component for Damage {
///     const KIND: ComponentKind = ComponentKind::Linked;
/// }
/// ```
pub trait Component: 'static {
    /// Storage kind for this type. Fixed for the life of the process.
    const KIND: ComponentKind = ComponentKind::Simple;
}

/// Compact runtime identifier of a component type.
///
/// Ids are assigned sequentially at first registration and stay stable for
/// the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    /// Returns the id of `T`, registering it on first use.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        registry_id_of::<T>()
    }

    /// Returns the raw index of this id.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Returns the Rust type name registered for this id.
    #[must_use]
    pub fn name(self) -> &'static str {
        component_registry()
            .read()
            .by_id
            .get(self.0 as usize)
            .map_or("<unregistered>", |desc| desc.name)
    }

    /// Returns the storage kind registered for this id.
    #[must_use]
    pub fn kind(self) -> Option<ComponentKind> {
        component_registry()
            .read()
            .by_id
            .get(self.0 as usize)
            .map(|desc| desc.kind)
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.0)
    }
}

/// Registered metadata for one component type.
#[derive(Clone, Copy, Debug)]
struct ComponentDesc {
    name: &'static str,
    kind: ComponentKind,
}

/// Global mapping between Rust types and [`ComponentTypeId`]s.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - `by_id` only grows; ids are never reused.
struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    by_id: Vec<ComponentDesc>,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ComponentRegistry {
            by_type: HashMap::new(),
            by_id: Vec::new(),
        })
    })
}

thread_local! {
    /// Per-thread copy of resolved ids, so hot predicates skip the lock.
    static RESOLVED: RefCell<HashMap<TypeId, ComponentTypeId>> = RefCell::new(HashMap::new());
}

fn registry_id_of<T: Component>() -> ComponentTypeId {
    let type_id = TypeId::of::<T>();
    if let Some(id) = RESOLVED.with(|resolved| resolved.borrow().get(&type_id).copied()) {
        return id;
    }
    let id = register(type_id, type_name::<T>(), T::KIND);
    RESOLVED.with(|resolved| resolved.borrow_mut().insert(type_id, id));
    id
}

fn register(type_id: TypeId, name: &'static str, kind: ComponentKind) -> ComponentTypeId {
    if let Some(&id) = component_registry().read().by_type.get(&type_id) {
        return id;
    }

    let mut registry = component_registry().write();
    // Another caller may have registered between the two locks.
    if let Some(&id) = registry.by_type.get(&type_id) {
        return id;
    }
    let index = u32::try_from(registry.by_id.len()).expect("component type ids exhausted");
    let id = ComponentTypeId(index);
    registry.by_id.push(ComponentDesc { name, kind });
    registry.by_type.insert(type_id, id);
    id
}

/// A type-erased, shared component instance.
///
/// The instance lives in an `Rc<RefCell<T>>`, so clones of an
/// `AnyComponent` (and the typed handles returned by
/// [`AnyComponent::downcast`]) all point at the same value. Identity is
/// pointer identity, which is how linked instances are told apart.
#[derive(Clone)]
pub struct AnyComponent {
    type_id: ComponentTypeId,
    kind: ComponentKind,
    cell: Rc<dyn Any>,
}

impl AnyComponent {
    /// Wraps a new component value.
    pub fn new<T: Component>(value: T) -> Self {
        Self::from_shared(Rc::new(RefCell::new(value)))
    }

    /// Wraps an existing shared instance without copying it.
    pub fn from_shared<T: Component>(cell: Rc<RefCell<T>>) -> Self {
        Self {
            type_id: ComponentTypeId::of::<T>(),
            kind: T::KIND,
            cell,
        }
    }

    /// The component type of this instance.
    #[inline]
    #[must_use]
    pub fn component_type(&self) -> ComponentTypeId {
        self.type_id
    }

    /// The storage kind of this instance's type.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Returns `true` if this is an instance of `T`.
    #[must_use]
    pub fn is<T: Component>(&self) -> bool {
        self.cell.is::<RefCell<T>>()
    }

    /// Returns the typed shared handle, or `None` if this is not a `T`.
    #[must_use]
    pub fn downcast<T: Component>(&self) -> Option<Rc<RefCell<T>>> {
        Rc::clone(&self.cell).downcast::<RefCell<T>>().ok()
    }

    /// Returns `true` if both handles point at the same instance.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        ptr::addr_eq(Rc::as_ptr(&self.cell), Rc::as_ptr(&other.cell))
    }
}

impl fmt::Debug for AnyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyComponent")
            .field("type", &self.type_id.name())
            .field("kind", &self.kind)
            .field("ptr", &Rc::as_ptr(&self.cell).cast::<()>())
            .finish()
    }
}

/// A set of component types named as a tuple, e.g. `(Position, View)`.
///
/// Used by `has_all` / `has_any` on entities and snapshot views.
pub trait ComponentSet {
    /// The ids of every type in the set, in tuple order.
    fn type_ids() -> Vec<ComponentTypeId>;
}

macro_rules! impl_component_set {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            fn type_ids() -> Vec<ComponentTypeId> {
                vec![$(ComponentTypeId::of::<$name>()),+]
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);
impl_component_set!(A, B, C, D, E, F, G);
impl_component_set!(A, B, C, D, E, F, G, H);
