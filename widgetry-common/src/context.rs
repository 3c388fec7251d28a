//! Request-scoped state.
//!
//! Every request handled by the middleware runs inside its own
//! [`RequestContext`] scope (a tokio task-local), so deeply nested rendering
//! code can reach the active middleware and register resources without the
//! context being threaded through every call. Code running outside any request
//! (start-up, import-time registration) sees a single detached process-wide
//! context instead.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use crate::error::ContextError;
use crate::resource::ResourceRegistration;

/// Key under which the active middleware stores itself.
pub const MIDDLEWARE_KEY: &str = "middleware";

/// Key of the pending resource-registration queue.
pub const QUEUED_RESOURCES_KEY: &str = "queued_resources";

/// Maximum number of registrations the pending queue holds.
pub const PENDING_LIMIT: usize = 4096;

type Slot = Box<dyn Any + Send + Sync>;

tokio::task_local! {
    static REQUEST_LOCAL: RequestContext;
}

static DETACHED: LazyLock<RequestContext> = LazyLock::new(RequestContext::default);

/// Keyed storage scoped to the current request.
///
/// Cloning yields another handle to the same storage.
#[derive(Clone, Default)]
pub struct RequestContext {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl RequestContext {
    /// The context of the request being processed by the current task, or the
    /// detached context when no request scope is active.
    pub fn current() -> Self {
        REQUEST_LOCAL
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::detached())
    }

    /// The process-wide context used outside of any request.
    pub fn detached() -> Self {
        DETACHED.clone()
    }

    /// Run `fut` with this context installed as the current one.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        REQUEST_LOCAL.scope(self, fut).await
    }

    /// Remove every key. Safe to call on an empty context.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Returns a guard that clears this context when dropped.
    pub fn clear_on_drop(&self) -> ClearGuard {
        ClearGuard { ctx: self.clone() }
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.slots.lock().insert(key.into(), Box::new(value));
    }

    /// Value stored under `key`, if present and of type `T`.
    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    /// Value stored under `key`, or `default` when missing.
    pub fn get_or<T: Any + Clone>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Value stored under `key`, failing when it is missing or mistyped.
    pub fn try_get<T: Any + Clone>(&self, key: &str) -> Result<T, ContextError> {
        let slots = self.slots.lock();
        let slot = slots
            .get(key)
            .ok_or_else(|| ContextError::NotFound(key.to_string()))?;
        slot.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ContextError::TypeMismatch(key.to_string()))
    }

    /// Remove and return the value stored under `key`.
    pub fn remove<T: Any>(&self, key: &str) -> Option<T> {
        let slot = self.slots.lock().remove(key)?;
        slot.downcast::<T>().ok().map(|value| *value)
    }

    /// Mutate the value under `key` in place, starting from `T::default()`
    /// when the key is absent. A value of another type is replaced.
    pub fn update<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync + Default,
    {
        let mut slots = self.slots.lock();
        let mut value: Box<T> = slots
            .remove(key)
            .and_then(|slot| slot.downcast::<T>().ok())
            .unwrap_or_default();
        let out = f(&mut value);
        slots.insert(key.to_string(), value);
        out
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Append a registration to the pending queue (FIFO, bounded by
    /// [`PENDING_LIMIT`]).
    pub fn queue_resource(&self, registration: ResourceRegistration) -> Result<(), ContextError> {
        self.update(QUEUED_RESOURCES_KEY, |queue: &mut VecDeque<ResourceRegistration>| {
            if queue.len() >= PENDING_LIMIT {
                tracing::warn!(
                    module = %registration.module,
                    filename = %registration.filename,
                    "Pending resource queue full, dropping registration"
                );
                return Err(ContextError::QueueFull(PENDING_LIMIT));
            }
            queue.push_back(registration);
            Ok(())
        })
    }

    /// Take every pending registration in arrival order. The queue is
    /// discarded; a second drain returns nothing.
    pub fn drain_queued_resources(&self) -> Vec<ResourceRegistration> {
        self.remove::<VecDeque<ResourceRegistration>>(QUEUED_RESOURCES_KEY)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("RequestContext")
            .field("keys", &slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Clears its context on drop.
#[must_use = "the context is cleared as soon as the guard is dropped"]
pub struct ClearGuard {
    ctx: RequestContext,
}

impl Drop for ClearGuard {
    fn drop(&mut self) {
        self.ctx.clear();
    }
}
