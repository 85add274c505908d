//! Contexts of running targets, and the per-thread stack of targets used to
//! find the nearest one from anywhere in a target's call graph.
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::context::Context;
use crate::engine::Engine;
use crate::task::Key;

/// Contexts of the targets currently running, by display name.
///
/// Registering a name which is already present shadows the older entry until
/// the newer registration is dropped. Lookups see the registrations made on
/// their own thread first, so concurrent runs of one target under different
/// arguments keep their contexts apart.
#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    entries: Mutex<HashMap<Arc<str>, Vec<Entry>>>,
    next: AtomicU64,
}

#[derive(Debug)]
struct Entry {
    token: u64,
    thread: ThreadId,
    ctx: Context,
}

impl ContextRegistry {
    pub(crate) fn register(self: &Arc<Self>, name: Arc<str>, ctx: Context) -> Registration {
        let token = self.next.fetch_add(1, Ordering::Relaxed);

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.clone())
            .or_default()
            .push(Entry {
                token,
                thread: thread::current().id(),
                ctx,
            });

        Registration {
            registry: self.clone(),
            name,
            token,
        }
    }

    /// The context visible under `name`, if a target by that name is running.
    pub(crate) fn lookup(&self, name: &str) -> Option<Context> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let stack = entries.get(name)?;
        let here = thread::current().id();

        stack
            .iter()
            .rev()
            .find(|entry| entry.thread == here)
            .or_else(|| stack.last())
            .map(|entry| entry.ctx.clone())
    }

    fn unregister(&self, name: &str, token: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(stack) = entries.get_mut(name) {
            stack.retain(|entry| entry.token != token);
            if stack.is_empty() {
                entries.remove(name);
            }
        }
    }
}

/// Keeps a context registered under a name; dropping it removes the entry,
/// including when the target unwinds.
#[must_use = "the context is unregistered as soon as this is dropped"]
pub struct Registration {
    registry: Arc<ContextRegistry>,
    name: Arc<str>,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.name, self.token);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A target running on this thread.
#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) engine: Engine,
    pub(crate) name: Arc<str>,
    /// Keys of every target from the outermost one down to this one.
    pub(crate) lineage: Arc<[Key]>,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame pushed by [`enter`] when dropped.
pub(crate) struct FrameGuard {
    // frames belong to the thread which pushed them
    _local: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STACK.with_borrow_mut(|stack| {
            stack.pop();
        });
    }
}

pub(crate) fn enter(frame: Frame) -> FrameGuard {
    STACK.with_borrow_mut(|stack| stack.push(frame));
    FrameGuard {
        _local: PhantomData,
    }
}

/// The engine of the innermost target running on this thread.
pub(crate) fn current_engine() -> Option<Engine> {
    STACK.with_borrow(|stack| stack.last().map(|frame| frame.engine.clone()))
}

/// Targets leading to the innermost one running on this thread, as long as
/// it was started by `engine`.
pub(crate) fn lineage_for(engine: &Engine) -> Arc<[Key]> {
    STACK
        .with_borrow(|stack| {
            stack
                .last()
                .filter(|frame| frame.engine.same(engine))
                .map(|frame| frame.lineage.clone())
        })
        .unwrap_or_else(|| Arc::from([]))
}

/// Returns the context of the nearest enclosing running target, or a
/// background context when called outside of any target. Never blocks.
///
/// A target sees its own context even while another run under the same name
/// is registered on a different thread.
///
/// ```
/// let ctx = shigoto::resolve_active_context();
/// assert!(ctx.current_target().is_none());
/// ```
pub fn resolve_active_context() -> Context {
    STACK
        .with_borrow(|stack| {
            stack
                .iter()
                .rev()
                .find_map(|frame| frame.engine.registry().lookup(&frame.name))
        })
        .unwrap_or_default()
}

/// Gives up the execution slot of the innermost running target while it
/// waits for its dependencies, and takes it back when dropped.
pub(crate) struct Suspended(Engine);

impl Drop for Suspended {
    fn drop(&mut self) {
        self.0.gate().acquire();
    }
}

pub(crate) fn suspend() -> Option<Suspended> {
    let engine = current_engine()?;
    engine.gate().release();
    Some(Suspended(engine))
}
