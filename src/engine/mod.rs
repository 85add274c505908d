mod gate;
mod once;
pub(crate) mod registry;
mod watch;

use std::num::NonZeroUsize;
use std::sync::{Arc, LazyLock};
use std::thread::{self, ScopedJoinHandle};

use crate::config::Settings;
use crate::context::Context;
use crate::error::{BindError, DepsError, TaskError};
use crate::task::{Key, Task};

use self::gate::Gate;
use self::once::RunOnce;
use self::registry::{ContextRegistry, Registration};

pub use self::watch::Mode;

/// Owns the run-once table, the context registry and the run-wide flags.
///
/// Cloning is cheap and every clone refers to the same state. A process
/// normally uses the one returned by [`Engine::global`], configured from the
/// environment; separate engines never share results.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    once: RunOnce,
    registry: Arc<ContextRegistry>,
    gate: Gate,
    watch: watch::WatchState,
}

static GLOBAL: LazyLock<Engine> = LazyLock::new(|| Engine::new(Settings::from_env()));

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate: Gate::new(settings.max_parallel),
                settings,
                once: RunOnce::default(),
                registry: Arc::default(),
                watch: Default::default(),
            }),
        }
    }

    pub fn config() -> Config {
        Config::default()
    }

    /// The process-wide engine, configured from the environment on first use.
    pub fn global() -> &'static Engine {
        &GLOBAL
    }

    /// The engine running the innermost target on this thread, or the global
    /// one outside of any target.
    pub fn current() -> Engine {
        registry::current_engine().unwrap_or_else(|| Self::global().clone())
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Runs a single task under `ctx`, or waits for the result if the task
    /// already ran or is running.
    pub fn run(&self, ctx: &Context, task: &Task) -> Result<(), TaskError> {
        let lineage = registry::lineage_for(self);
        let _suspended = registry::suspend();
        once::ensure_run(self, task, ctx, &lineage, false)
    }

    /// Makes `ctx` visible to [`resolve_active_context`](crate::resolve_active_context)
    /// from targets named `name` until the returned guard is dropped.
    pub fn register_context(&self, name: impl Into<Arc<str>>, ctx: Context) -> Registration {
        self.inner.registry.register(name.into(), ctx)
    }

    /// Result of a task which already finished on this engine.
    pub fn outcome(&self, key: &Key) -> Option<Result<(), TaskError>> {
        self.inner.once.outcome(key)
    }

    /// Runs the dependencies concurrently and waits for all of them. Each one
    /// runs under the context of the calling target.
    ///
    /// Binding errors are reported before anything runs. When several
    /// dependencies fail, all failures are reported together.
    pub fn deps<I>(&self, deps: I) -> Result<(), DepsError>
    where
        I: IntoIterator<Item = Result<Task, BindError>>,
    {
        let tasks = bind_all(deps)?;
        let ctx = registry::resolve_active_context();

        let _suspended = registry::suspend();
        let failures = self.fan_out(&ctx, &tasks, false);

        DepsError::from_failures(failures).map_or(Ok(()), Err)
    }

    /// Runs the dependencies one after another, stopping at the first
    /// failure.
    pub fn serial_deps<I>(&self, deps: I) -> Result<(), DepsError>
    where
        I: IntoIterator<Item = Result<Task, BindError>>,
    {
        let tasks = bind_all(deps)?;
        let ctx = registry::resolve_active_context();
        let lineage = registry::lineage_for(self);

        let _suspended = registry::suspend();
        for task in &tasks {
            once::ensure_run(self, task, &ctx, &lineage, false)?;
        }

        Ok(())
    }

    /// Like [`Engine::deps`], with `ctx` passed to every dependency. Nothing
    /// starts once `ctx` is cancelled or past its deadline; tasks which are
    /// already running elsewhere are not interrupted.
    pub fn ctx_deps<I>(&self, ctx: &Context, deps: I) -> Result<(), DepsError>
    where
        I: IntoIterator<Item = Result<Task, BindError>>,
    {
        let tasks = bind_all(deps)?;

        if let Some(err) = ctx.err() {
            return Err(DepsError::Cancelled(err));
        }

        let _suspended = registry::suspend();
        let failures = self.fan_out(ctx, &tasks, true);

        DepsError::from_failures(failures).map_or(Ok(()), Err)
    }

    /// Runs every task on its own thread, except for the last one which runs
    /// on the calling thread. Returns the failures in dependency order.
    fn fan_out(&self, ctx: &Context, tasks: &[Task], checked: bool) -> Vec<TaskError> {
        let Some((last, rest)) = tasks.split_last() else {
            return Vec::new();
        };

        let lineage = registry::lineage_for(self);
        let span = tracing::Span::current();

        let run = |task: &Task| {
            if checked && let Some(err) = ctx.err() {
                return Err(TaskError::new(task.key().to_string(), err));
            }
            once::ensure_run(self, task, ctx, &lineage, checked)
        };

        thread::scope(|scope| {
            let pending: Vec<Pending<'_>> = rest
                .iter()
                .map(|task| {
                    let span = span.clone();
                    let run = &run;
                    thread::Builder::new()
                        .name(task.name().to_owned())
                        .spawn_scoped(scope, move || span.in_scope(|| run(task)))
                        .map_or_else(|_| Pending::Done(run(task)), Pending::Spawned)
                })
                .collect();

            let inline = run(last);

            let mut results: Vec<_> = rest
                .iter()
                .zip(pending)
                .map(|(task, pending)| match pending {
                    Pending::Done(result) => result,
                    Pending::Spawned(handle) => handle.join().unwrap_or_else(|_| {
                        Err(TaskError::new(
                            task.key().to_string(),
                            anyhow::anyhow!("target thread panicked"),
                        ))
                    }),
                })
                .collect();
            results.push(inline);

            results.into_iter().filter_map(Result::err).collect()
        })
    }

    /// Switches between a single build and the watch loop. Set by the driver
    /// before running the outermost target.
    pub fn set_mode(&self, mode: Mode) {
        self.inner.watch.set_mode(mode);
    }

    pub fn mode(&self) -> Mode {
        self.inner.watch.mode()
    }

    pub fn is_watch_mode(&self) -> bool {
        self.mode() == Mode::Watch
    }

    pub fn set_outermost_target(&self, name: impl Into<String>) {
        self.inner.watch.set_outermost_target(name);
    }

    /// Name of the target the driver was asked to run.
    pub fn outermost_target(&self) -> Option<String> {
        self.inner.watch.outermost_target()
    }

    pub(crate) fn once(&self) -> &RunOnce {
        &self.inner.once
    }

    pub(crate) fn registry(&self) -> &Arc<ContextRegistry> {
        &self.inner.registry
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.inner.gate
    }

    pub(crate) fn same(&self, other: &Engine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.inner.settings)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

/// A dependency handed to its own thread, or already run inline because no
/// thread could be spawned.
enum Pending<'scope> {
    Spawned(ScopedJoinHandle<'scope, Result<(), TaskError>>),
    Done(Result<(), TaskError>),
}

fn bind_all<I>(deps: I) -> Result<Vec<Task>, BindError>
where
    I: IntoIterator<Item = Result<Task, BindError>>,
{
    deps.into_iter().collect()
}

/// Builder for an [`Engine`], starting from the default settings.
#[derive(Debug, Default)]
pub struct Config {
    settings: Settings,
}

impl Config {
    /// Replaces all settings, for instance with [`Settings::from_env`].
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.settings.verbose = verbose;
        self
    }

    /// Limits how many target bodies run at the same time, `0` for no limit.
    pub fn max_parallel(mut self, limit: usize) -> Self {
        self.settings.max_parallel = NonZeroUsize::new(limit);
        self
    }

    pub fn finish(self) -> Engine {
        Engine::new(self.settings)
    }
}
