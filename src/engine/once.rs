//! Runs every distinct task at most once per engine.
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use tracing::Level;

use crate::color;
use crate::context::Context;
use crate::engine::Engine;
use crate::engine::registry::{self, Frame};
use crate::error::{CycleError, Fatal, TaskError};
use crate::task::{Key, Task};
use crate::utils::as_overhead;

/// Completion record of one task identity. Created by the first caller, which
/// then runs the task; everybody else waits for the result.
#[derive(Debug, Default)]
struct Record {
    result: Mutex<Option<Result<(), TaskError>>>,
    done: Condvar,
}

impl Record {
    fn finish(&self, result: Result<(), TaskError>) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<(), TaskError> {
        let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = &*result {
                return result.clone();
            }
            result = self
                .done
                .wait(result)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn peek(&self) -> Option<Result<(), TaskError>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

enum Claim {
    Owner(Arc<Record>),
    Waiter(Arc<Record>),
}

/// Table of task identities seen so far. The lock only guards the lookup,
/// never the execution of a task.
#[derive(Debug, Default)]
pub(crate) struct RunOnce {
    table: Mutex<HashMap<Key, Arc<Record>>>,
}

impl RunOnce {
    fn claim(&self, key: &Key) -> Claim {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        match table.get(key) {
            Some(record) => Claim::Waiter(record.clone()),
            None => {
                let record = Arc::new(Record::default());
                table.insert(key.clone(), record.clone());
                Claim::Owner(record)
            }
        }
    }

    /// Result of a task which already finished, `None` if it never ran or is
    /// still running.
    pub(crate) fn outcome(&self, key: &Key) -> Option<Result<(), TaskError>> {
        let record = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()?;

        record.peek()
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, key: &Key) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

/// Runs `task` unless it already ran or is running, in which case its result
/// is awaited. `lineage` lists the targets which requested this one.
///
/// When `checked`, a body whose context died while it waited for an
/// execution slot fails with the context's error instead of running.
pub(crate) fn ensure_run(
    engine: &Engine,
    task: &Task,
    ctx: &Context,
    lineage: &Arc<[Key]>,
    checked: bool,
) -> Result<(), TaskError> {
    let key = task.key();

    if let Some(start) = lineage.iter().position(|k| k == key) {
        let chain = lineage[start..]
            .iter()
            .chain([key])
            .map(ToString::to_string)
            .collect();

        return Err(TaskError::new(key.to_string(), CycleError(chain)));
    }

    match engine.once().claim(key) {
        Claim::Waiter(record) => record.wait(),
        Claim::Owner(record) => {
            let result = execute(engine, task, ctx, lineage, checked);
            record.finish(result.clone());
            result
        }
    }
}

fn execute(
    engine: &Engine,
    task: &Task,
    ctx: &Context,
    lineage: &Arc<[Key]>,
    checked: bool,
) -> Result<(), TaskError> {
    let settings = engine.settings();
    let name = color::target_style(settings).apply_to(task.key());

    let span = tracing::span!(Level::INFO, "target", name = task.name());
    let _enter = span.enter();

    if settings.verbose {
        tracing::info!("Running dependency: {name}");
    } else {
        tracing::debug!("Running dependency: {name}");
    }

    let ctx = ctx.with_target(task.name_arc());
    let lineage: Arc<[Key]> = lineage.iter().chain([task.key()]).cloned().collect();
    let start = Instant::now();

    let result = {
        let _registration = engine.registry().register(task.name_arc(), ctx.clone());
        let _frame = registry::enter(Frame {
            engine: engine.clone(),
            name: task.name_arc(),
            lineage,
        });
        let _slot = engine.gate().slot();

        match ctx.err().filter(|_| checked) {
            Some(err) => Err(anyhow::Error::new(err)),
            None => match catch_unwind(AssertUnwindSafe(|| task.invoke(&ctx))) {
                Ok(result) => result,
                Err(payload) => Err(from_panic(payload)),
            },
        }
    };

    match &result {
        Ok(()) => tracing::debug!("Finished {name} {}", as_overhead(start)),
        Err(err) => tracing::debug!("Failed {name} {}: {err:#}", as_overhead(start)),
    }

    result.map_err(|err| TaskError::new(task.key().to_string(), err))
}

/// Errors raised with `std::panic::panic_any` keep their type, so a target
/// can abort with a [`Fatal`] and still report its exit code.
fn from_panic(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let payload = match payload.downcast::<anyhow::Error>() {
        Ok(err) => return *err,
        Err(payload) => payload,
    };
    let payload = match payload.downcast::<Fatal>() {
        Ok(fatal) => return anyhow::Error::new(*fatal),
        Err(payload) => payload,
    };

    if let Some(s) = payload.downcast_ref::<&str>() {
        anyhow::anyhow!("target panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        anyhow::anyhow!("target panicked: {s}")
    } else {
        anyhow::anyhow!("target panicked with unknown payload")
    }
}
