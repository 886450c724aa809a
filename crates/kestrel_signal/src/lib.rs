//! # KESTREL Signal
//!
//! Typed, ordered, multi-subscriber notification channels.
//!
//! ## Dispatch Rules
//!
//! 1. **Priority order** - handlers run in ascending priority; ties run in
//!    connection order
//! 2. **Stable pass** - an emit iterates a snapshot of the slot list, so a
//!    handler connected during an emit is not invoked by that emit
//! 3. **Tombstones** - a handler disconnected during an emit is skipped if it
//!    has not run yet
//! 4. **Depth-first re-entrancy** - a nested `emit` runs to completion before
//!    the outer emit continues
//!
//! ## Example
//!
//! ```rust
//! use kestrel_signal::Signal;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let signal = Signal::<u32>::new();
//! let total = Rc::new(Cell::new(0));
//! let sink = Rc::clone(&total);
//! let connection = signal.connect(move |value| sink.set(sink.get() + *value));
//!
//! signal.emit(&5);
//! assert_eq!(total.get(), 5);
//!
//! assert!(signal.disconnect(connection));
//! signal.emit(&5);
//! assert_eq!(total.get(), 5);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handler ordering key. Lower values run first.
pub type Priority = i32;

/// Priority used by [`Signal::connect`].
pub const DEFAULT_PRIORITY: Priority = 0;

/// Connection ids are process-unique so a handle can never disconnect a slot
/// on a different signal.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`Signal::connect`], used to disconnect the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    id: u64,
}

impl Connection {
    fn next() -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Returns the raw connection id.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

struct Slot<T> {
    connection: Connection,
    priority: Priority,
    handler: Rc<dyn Fn(&T)>,
    /// Cleared on disconnect; checked by in-flight emits.
    alive: Rc<Cell<bool>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection,
            priority: self.priority,
            handler: Rc::clone(&self.handler),
            alive: Rc::clone(&self.alive),
        }
    }
}

/// A typed notification channel.
///
/// Signals are single-threaded: handlers are `Rc`-held closures and the
/// signal itself uses interior mutability, so every method takes `&self`.
/// No internal borrow is held while a handler runs, which lets handlers
/// connect, disconnect and emit on the same signal.
pub struct Signal<T> {
    slots: RefCell<Vec<Slot<T>>>,
}

impl<T> Signal<T> {
    /// Creates a signal with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Connects `handler` at [`DEFAULT_PRIORITY`].
    pub fn connect<F>(&self, handler: F) -> Connection
    where
        F: Fn(&T) + 'static,
    {
        self.connect_with_priority(handler, DEFAULT_PRIORITY)
    }

    /// Connects `handler` at an explicit priority.
    ///
    /// Handlers with a numerically larger priority run later. Among equal
    /// priorities the earlier connection runs first.
    pub fn connect_with_priority<F>(&self, handler: F, priority: Priority) -> Connection
    where
        F: Fn(&T) + 'static,
    {
        let connection = Connection::next();
        let slot = Slot {
            connection,
            priority,
            handler: Rc::new(handler),
            alive: Rc::new(Cell::new(true)),
        };

        let mut slots = self.slots.borrow_mut();
        let at = slots.partition_point(|s| s.priority <= priority);
        slots.insert(at, slot);
        connection
    }

    /// Disconnects a handler.
    ///
    /// Returns `false` if the connection was not attached to this signal
    /// (already disconnected, or from another signal).
    pub fn disconnect(&self, connection: Connection) -> bool {
        let removed = {
            let mut slots = self.slots.borrow_mut();
            slots
                .iter()
                .position(|s| s.connection == connection)
                .map(|index| slots.remove(index))
        };

        match removed {
            Some(slot) => {
                slot.alive.set(false);
                true
            }
            None => false,
        }
    }

    /// Disconnects every handler.
    pub fn disconnect_all(&self) {
        let drained: Vec<Slot<T>> = self.slots.borrow_mut().drain(..).collect();
        for slot in &drained {
            slot.alive.set(false);
        }
    }

    /// Returns `true` if `connection` is attached to this signal.
    #[must_use]
    pub fn is_connected(&self, connection: Connection) -> bool {
        self.slots
            .borrow()
            .iter()
            .any(|s| s.connection == connection)
    }

    /// Number of connected handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Returns `true` if no handler is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Invokes every connected handler with `payload`.
    pub fn emit(&self, payload: &T) {
        let pass: Vec<Slot<T>> = self.slots.borrow().clone();
        for slot in &pass {
            if slot.alive.get() {
                (slot.handler)(payload);
            }
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.len())
            .finish()
    }
}
