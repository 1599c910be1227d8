// =============================================================================
// EVENTS - Frame-bounded event manager
// =============================================================================
// Events are plain values queued per type and delivered once per pass,
// on the owner thread, in two phases: first every queue's pending events
// are staged, then each type's subscribers receive the staged batch as
// one slice in firing order. An event fired this frame is therefore
// never observed before the frame's delivery point, and an event no one
// subscribes to is dropped at delivery rather than accumulating.
//
// Firing is owner-thread-only by contract. Jobs that want to raise
// events route them through their command buffer instead.
// =============================================================================

//! Typed event queues, subscriptions and per-pass delivery.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::ecs::component::Component;
use crate::ecs::entity::Entity;

/// Marker for event payload types. Blanket-implemented.
pub trait Event: Send + 'static {}

impl<T: Send + 'static> Event for T {}

/// Receives events of one type at delivery.
pub trait EventHandler<E: Event>: Send {
    /// Called once per delivery with the whole frame's batch, in firing
    /// order. Not called for empty batches.
    fn handle_events(&mut self, events: &[E]);
}

impl<E: Event, F: FnMut(&[E]) + Send> EventHandler<E> for F {
    fn handle_events(&mut self, events: &[E]) {
        self(events)
    }
}

/// Shared handle to a subscriber. Also the identity used to unsubscribe.
pub type Subscriber<E> = Arc<Mutex<dyn EventHandler<E>>>;

/// Wraps a closure as a [`Subscriber`].
pub fn subscriber<E: Event, F: FnMut(&[E]) + Send + 'static>(f: F) -> Subscriber<E> {
    Arc::new(Mutex::new(f))
}

/// Fired after a component of type `T` is added to an existing entity.
pub struct ComponentAdded<T: Component> {
    /// The entity the component was added to.
    pub entity: Entity,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Component> ComponentAdded<T> {
    pub(crate) fn new(entity: Entity) -> Self {
        Self {
            entity,
            _marker: PhantomData,
        }
    }
}

/// Fired after a component of type `T` is removed from an entity.
/// Carries the removed value.
pub struct ComponentRemoved<T: Component> {
    /// The entity the component was removed from.
    pub entity: Entity,
    /// The removed component value.
    pub value: T,
}

// =============================================================================
// QUEUES
// =============================================================================

struct TypedQueue<E: Event> {
    pending: Vec<E>,
    staged: Vec<E>,
    subscribers: Vec<Subscriber<E>>,
}

impl<E: Event> TypedQueue<E> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            staged: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

trait AnyQueue: Send {
    fn stage(&mut self);
    fn deliver_staged(&mut self);
    fn pending_len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Event> AnyQueue for TypedQueue<E> {
    fn stage(&mut self) {
        debug_assert!(self.staged.is_empty());
        self.staged.append(&mut self.pending);
    }

    fn deliver_staged(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        for subscriber in &self.subscribers {
            subscriber.lock().handle_events(&self.staged);
        }
        self.staged.clear();
    }

    fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Default pending-queue size past which [`EventManager::fire`] warns.
pub const DEFAULT_PENDING_WARN: usize = 10_000;

/// Per-world event manager. Owned by the thread that created it; firing
/// and delivery from any other thread is a bug and panics.
pub struct EventManager {
    owner: ThreadId,
    queues: HashMap<TypeId, Box<dyn AnyQueue>>,
    pending_warn: usize,
}

impl EventManager {
    /// Creates a manager owned by the calling thread.
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            queues: HashMap::new(),
            pending_warn: DEFAULT_PENDING_WARN,
        }
    }

    /// Sets the pending-queue size past which [`fire`] logs a warning.
    /// A growing queue usually means delivery stopped being called.
    ///
    /// [`fire`]: Self::fire
    pub fn set_pending_warn(&mut self, threshold: usize) {
        self.pending_warn = threshold;
    }

    /// Queues `event` for this frame's delivery.
    ///
    /// # Panics
    /// Panics when called off the owner thread.
    pub fn fire<E: Event>(&mut self, event: E) {
        self.assert_owner();
        let threshold = self.pending_warn;
        let queue = self.queue_mut::<E>();
        queue.pending.push(event);
        if queue.pending.len() == threshold {
            tracing::warn!(
                event_type = std::any::type_name::<E>(),
                pending = threshold,
                "event queue keeps growing without delivery"
            );
        }
    }

    /// Registers `handler` for events of type `E`.
    pub fn subscribe<E: Event>(&mut self, handler: Subscriber<E>) {
        self.queue_mut::<E>().subscribers.push(handler);
    }

    /// Removes a subscriber previously passed to [`subscribe`].
    /// Identity is the `Arc` allocation, not the handler's contents.
    ///
    /// [`subscribe`]: Self::subscribe
    pub fn unsubscribe<E: Event>(&mut self, handler: &Subscriber<E>) {
        self.queue_mut::<E>()
            .subscribers
            .retain(|existing| !Arc::ptr_eq(existing, handler));
    }

    /// Delivers every pending event and clears the queues.
    ///
    /// Staging happens for all types before any handler runs, so the set
    /// of delivered events is exactly what was pending at the call.
    ///
    /// # Panics
    /// Panics when called off the owner thread.
    pub fn deliver(&mut self) {
        self.assert_owner();
        for queue in self.queues.values_mut() {
            queue.stage();
        }
        for queue in self.queues.values_mut() {
            queue.deliver_staged();
        }
    }

    /// Number of events of type `E` waiting for the next delivery.
    #[must_use]
    pub fn pending<E: Event>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .map_or(0, |queue| queue.pending_len())
    }

    fn queue_mut<E: Event>(&mut self) -> &mut TypedQueue<E> {
        let queue = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(TypedQueue::<E>::new()));
        match queue.as_any_mut().downcast_mut::<TypedQueue<E>>() {
            Some(typed) => typed,
            None => unreachable!("event queue keyed by a foreign TypeId"),
        }
    }

    fn assert_owner(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "events are owner-thread-only; queue through a command buffer instead"
        );
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================
