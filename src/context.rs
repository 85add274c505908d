use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Execution context handed to targets.
///
/// A `Context` carries a cancellation scope, an optional deadline, the name
/// of the target it was created for and optional user state. It is cheap to
/// clone, all clones share the same cancellation scope.
///
/// Targets receive it either by taking a `Context` as their first parameter
/// (after the namespace receiver, if any), or by asking for the context of
/// the nearest running target with
/// [`resolve_active_context`](crate::resolve_active_context).
#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    target: Option<Arc<str>>,
    state: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// An empty context which is never cancelled unless [`cancel`](Self::cancel)
    /// is called on it.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context with its own cancellation scope. Cancelling the
    /// parent cancels the child, but not the other way around.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    /// Derives a child context which expires at `deadline`, or earlier if the
    /// parent has a tighter deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };

        Self {
            deadline: Some(deadline),
            ..self.child()
        }
    }

    /// Derives a child context which expires after `timeout`. A timeout too
    /// large to represent as an instant leaves the parent's deadline, if any.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Cancels this context and everything derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reports why the context is no longer live, `None` while it still is.
    /// Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The token behind this context, for use with APIs which accept one.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns a context which records `name` as the current target.
    pub fn with_target(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            target: Some(name.into()),
            ..self.clone()
        }
    }

    /// Name of the target this context was created for.
    pub fn current_target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Returns a context which carries `state`, replacing any state already
    /// attached.
    pub fn with_target_state<T>(&self, state: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            state: Some(Arc::new(state)),
            ..self.clone()
        }
    }

    /// The attached state, if there is any and it has type `T`.
    pub fn target_state<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.state.as_deref()?.downcast_ref::<T>()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("target", &self.target)
            .field("state", &self.state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.current_target().is_none());
        assert!(ctx.target_state::<u32>().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children_only() {
        let parent = Context::background();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert!(parent.err().is_none());
        assert!(sibling.err().is_none());

        parent.cancel();
        assert_eq!(sibling.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_clones_share_scope() {
        let ctx = Context::background();
        let named = ctx.with_target("build");
        ctx.cancel();
        assert!(named.is_done());
    }

    #[test]
    fn test_deadline() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        let later = ctx.with_timeout(Duration::from_secs(3600));
        assert_eq!(later.deadline(), ctx.deadline());
    }

    #[test]
    fn test_unbounded_timeout() {
        let ctx = Context::background().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(ctx.err().is_none());

        let bounded = Context::background().with_timeout(Duration::from_secs(60));
        let child = bounded.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), bounded.deadline());

        bounded.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_target_and_state() {
        let ctx = Context::background()
            .with_target("build")
            .with_target_state(String::from("release"));

        assert_eq!(ctx.current_target(), Some("build"));
        assert_eq!(ctx.target_state::<String>().map(String::as_str), Some("release"));
        assert!(ctx.target_state::<u32>().is_none());

        let renamed = ctx.with_target("test");
        assert_eq!(renamed.current_target(), Some("test"));
        assert!(renamed.target_state::<String>().is_some());
    }
}
