#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod color;
pub mod config;
mod context;
mod engine;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
pub mod paths;
pub mod sh;
mod task;
mod utils;

pub use crate::color::Color;
pub use crate::config::Settings;
pub use crate::context::Context;
pub use crate::engine::registry::{Registration, resolve_active_context};
pub use crate::engine::{Config, Engine, Mode};
pub use crate::error::*;
pub use crate::task::{
    Arg, ArgKind, IntoDep, Key, Namespace, Outcome, Param, ParamKind, Target, Task, dep, normalize,
};

#[doc(hidden)]
pub use crate::task::{
    Bare, Bound, Cursor, Pending, Plain, WithContext, WithNamespace, WithNamespaceContext,
};

/// Return type for targets which can fail.
pub type TargetResult = anyhow::Result<()>;

/// Runs the dependencies concurrently on the current engine, under the
/// context of the calling target. See [`Engine::deps`].
pub fn deps<I>(deps: I) -> Result<(), DepsError>
where
    I: IntoIterator<Item = Result<Task, BindError>>,
{
    Engine::current().deps(deps)
}

/// Runs the dependencies in order on the current engine. See
/// [`Engine::serial_deps`].
pub fn serial_deps<I>(deps: I) -> Result<(), DepsError>
where
    I: IntoIterator<Item = Result<Task, BindError>>,
{
    Engine::current().serial_deps(deps)
}

/// Runs the dependencies concurrently on the current engine, passing them
/// `ctx`. See [`Engine::ctx_deps`].
pub fn ctx_deps<I>(ctx: &Context, deps: I) -> Result<(), DepsError>
where
    I: IntoIterator<Item = Result<Task, BindError>>,
{
    Engine::current().ctx_deps(ctx, deps)
}

/// Runs functions, bound tasks or binding results concurrently.
///
/// ```
/// fn fmt() {}
/// fn lint(_strict: bool) {}
///
/// shigoto::deps!(fmt, shigoto::Task::bind(lint, [true])).unwrap();
/// ```
#[macro_export]
macro_rules! deps {
    ($($dep:expr),* $(,)?) => {
        $crate::deps([$($crate::dep($dep)),*])
    };
}

/// Sequential counterpart of [`deps!`].
#[macro_export]
macro_rules! serial_deps {
    ($($dep:expr),* $(,)?) => {
        $crate::serial_deps([$($crate::dep($dep)),*])
    };
}

/// Context-passing counterpart of [`deps!`]; the first argument is the
/// [`Context`].
#[macro_export]
macro_rules! ctx_deps {
    ($ctx:expr $(, $dep:expr)* $(,)?) => {
        $crate::ctx_deps(&$ctx, [$($crate::dep($dep)),*])
    };
}
