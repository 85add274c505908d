use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::task::ArgKind;

/// Exit code reported for any failure which doesn't carry its own.
pub const GENERIC_FAILURE: i32 = 1;

/// An error which carries the exit code the process should terminate with.
///
/// This is the only way for a target to pick a specific exit code, ordinary
/// errors are reported as a generic failure. See [`exit_status`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Fatal {
    code: i32,
    message: String,
}

impl Fatal {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Creates a [`Fatal`] error with an exit code and a formatted message.
///
/// ```
/// let err = shigoto::fatal!(3, "missing tool: {}", "protoc");
/// assert_eq!(err.code(), 3);
/// assert_eq!(err.to_string(), "missing tool: protoc");
/// ```
#[macro_export]
macro_rules! fatal {
    ($code:expr, $($arg:tt)+) => {
        $crate::Fatal::new($code, ::std::format!($($arg)+))
    };
}

/// Errors raised while binding a target to its arguments. These are always
/// reported before anything gets executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("target '{name}' takes {expected} argument(s), but {given} were given")]
    Arity {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("target '{name}' takes at least {expected} argument(s), but {given} were given")]
    ArityVariadic {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("target '{name}': argument {position} should be {expected}, but got {given}")]
    Kind {
        name: String,
        position: usize,
        expected: ArgKind,
        given: ArgKind,
    },

    #[error("target '{name}': variadic parameter {position} must be the last one")]
    VariadicNotLast { name: String, position: usize },

    #[error("target '{name}': couldn't serialize arguments.\n{reason}")]
    Serialize { name: String, reason: String },

    #[error("a target of type '{type_name}' has no name of its own, bind it with Task::named")]
    Unnamed { type_name: String },
}

/// Errors reported by a [`Context`](crate::Context) which is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// The frozen result of a failed target.
///
/// Cloning is cheap and every clone points at the same underlying error, so
/// all callers requesting the same task observe the very same value.
#[derive(Clone)]
pub struct TaskError {
    target: Arc<str>,
    error: Arc<anyhow::Error>,
}

impl TaskError {
    pub fn new(target: impl Into<Arc<str>>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            target: target.into(),
            error: Arc::new(error.into()),
        }
    }

    /// Display name of the failed target, with its arguments if any.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Whether both values are clones of the same recorded failure.
    pub fn ptr_eq(&self, other: &TaskError) -> bool {
        Arc::ptr_eq(&self.error, &other.error)
    }

    /// Exit code carried by the wrapped error, if any.
    pub fn exit_status(&self) -> i32 {
        code_of(AsRef::<dyn StdError>::as_ref(&*self.error)).unwrap_or(GENERIC_FAILURE)
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskError")
            .field("target", &self.target)
            .field("error", &self.error)
            .finish()
    }
}

/// Shows the outermost message of the wrapped error; the alternate form
/// `{:#}` appends its causes.
impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(f, "Target '{}': {:#}", self.target, self.error)
        } else {
            write!(f, "Target '{}': {}", self.target, self.error)
        }
    }
}

impl StdError for TaskError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        AsRef::<dyn StdError>::as_ref(&*self.error).source()
    }
}

/// A dependency requires a task which is already running further up the
/// requesting chain, waiting for it would never finish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle detected: {}", .0.join(" -> "))]
pub struct CycleError(pub Vec<String>);

/// Errors returned by the dependency strategies.
#[derive(Debug, Clone, Error)]
pub enum DepsError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Cancelled(#[from] ContextError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("{} dependencies failed:\n{}", .failures.len(), join_lines(.failures))]
    Many { failures: Vec<TaskError>, code: i32 },
}

impl DepsError {
    /// Builds the error reported for a group of dependencies which ran side
    /// by side; `None` when nothing failed.
    pub(crate) fn from_failures(mut failures: Vec<TaskError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(DepsError::Task),
            _ => {
                let code = failures
                    .iter()
                    .fold(0, |acc, err| merge_exit(acc, err.exit_status()));

                Some(DepsError::Many { failures, code })
            }
        }
    }

    /// Every task failure accounted for by this error.
    pub fn failures(&self) -> &[TaskError] {
        match self {
            DepsError::Task(err) => std::slice::from_ref(err),
            DepsError::Many { failures, .. } => failures,
            DepsError::Bind(_) | DepsError::Cancelled(_) => &[],
        }
    }

    pub fn exit_status(&self) -> i32 {
        match self {
            DepsError::Task(err) => err.exit_status(),
            DepsError::Many { code, .. } => *code,
            DepsError::Bind(_) | DepsError::Cancelled(_) => GENERIC_FAILURE,
        }
    }
}

fn join_lines(failures: &[TaskError]) -> String {
    failures
        .iter()
        .map(|err| format!("{err:#}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors from running external commands.
#[derive(Debug, Error)]
pub enum ShError {
    #[error("failed to run \"{cmd}\": {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("running \"{cmd}\" failed with exit code {code}")]
    Exit { cmd: String, code: i32 },

    #[error("running \"{cmd}\" was terminated by a signal")]
    Signal { cmd: String },

    #[error("output of \"{cmd}\" is not valid UTF-8")]
    Utf8 {
        cmd: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

impl ShError {
    /// Whether the command actually started.
    pub fn ran(&self) -> bool {
        !matches!(self, ShError::Spawn { .. })
    }

    pub fn exit_status(&self) -> i32 {
        match self {
            ShError::Exit { code, .. } => *code,
            _ => GENERIC_FAILURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown color '{0}'")]
pub struct UnknownColor(pub String);

/// Returns the process exit code for an error: 0 for `None`, the carried code
/// for a [`Fatal`] error (found anywhere in the source chain) and
/// [`GENERIC_FAILURE`] for everything else.
pub fn exit_status(err: Option<&(dyn StdError + 'static)>) -> i32 {
    match err {
        None => 0,
        Some(err) => code_of(err).unwrap_or(GENERIC_FAILURE),
    }
}

/// [`exit_status`] for the result of a target returning `anyhow::Result`.
pub fn exit_status_of<T>(result: &anyhow::Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => exit_status(Some(AsRef::<dyn StdError>::as_ref(err))),
    }
}

fn code_of(err: &(dyn StdError + 'static)) -> Option<i32> {
    let mut next = Some(err);

    while let Some(err) = next {
        if let Some(fatal) = err.downcast_ref::<Fatal>() {
            return Some(fatal.code());
        }
        if let Some(task) = err.downcast_ref::<TaskError>() {
            return Some(task.exit_status());
        }
        if let Some(deps) = err.downcast_ref::<DepsError>() {
            return Some(deps.exit_status());
        }
        if let Some(sh) = err.downcast_ref::<ShError>() {
            return Some(sh.exit_status());
        }
        next = err.source();
    }

    None
}

/// Combines exit codes of sibling failures. Zero is ignored, and two
/// different non-zero codes can only be reported as a generic failure.
pub(crate) fn merge_exit(old: i32, new: i32) -> i32 {
    match (old, new) {
        (old, 0) => old,
        (0, new) => new,
        (old, new) if old == new => old,
        _ => GENERIC_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_basic() {
        let fatal = Fatal::new(42, "boom");
        let plain = std::io::Error::other("plain");

        assert_eq!(exit_status(None), 0);
        assert_eq!(exit_status(Some(&fatal)), 42);
        assert_eq!(exit_status(Some(&plain)), GENERIC_FAILURE);
    }

    #[test]
    fn test_exit_status_through_anyhow_context() {
        let result: anyhow::Result<()> =
            Err(anyhow::Error::new(fatal!(7, "bad {}", "input")).context("while building"));

        assert_eq!(exit_status_of(&result), 7);
        assert_eq!(exit_status_of(&Ok::<_, anyhow::Error>(())), 0);
    }

    #[test]
    fn test_exit_status_task_error() {
        let err = TaskError::new("build", Fatal::new(3, "no compiler"));
        assert_eq!(exit_status(Some(&err)), 3);

        let err = TaskError::new("build", anyhow::anyhow!("oops"));
        assert_eq!(exit_status(Some(&err)), GENERIC_FAILURE);
    }

    #[test]
    fn test_merge_exit() {
        assert_eq!(merge_exit(0, 0), 0);
        assert_eq!(merge_exit(0, 4), 4);
        assert_eq!(merge_exit(4, 0), 4);
        assert_eq!(merge_exit(4, 4), 4);
        assert_eq!(merge_exit(4, 5), GENERIC_FAILURE);
    }

    #[test]
    fn test_deps_error_from_failures() {
        assert!(DepsError::from_failures(vec![]).is_none());

        let single = DepsError::from_failures(vec![TaskError::new("a", Fatal::new(9, "a"))]);
        assert!(matches!(single, Some(DepsError::Task(_))));

        let many = DepsError::from_failures(vec![
            TaskError::new("a", Fatal::new(9, "first broke")),
            TaskError::new("b", Fatal::new(9, "second broke")),
        ])
        .unwrap();

        assert_eq!(many.exit_status(), 9);
        assert_eq!(many.failures().len(), 2);

        let text = many.to_string();
        assert!(text.contains("first broke"));
        assert!(text.contains("second broke"));
    }

    #[test]
    fn test_cloned_task_error_is_shared() {
        let err = TaskError::new("a", anyhow::anyhow!("x"));
        let copy = err.clone();
        assert!(err.ptr_eq(&copy));
        assert!(!err.ptr_eq(&TaskError::new("a", anyhow::anyhow!("x"))));
    }

    #[test]
    fn test_task_error_exposes_causes() {
        let cause = std::io::Error::other("disk full");
        let err = TaskError::new("build", anyhow::Error::new(cause).context("writing output"));

        assert_eq!(err.to_string(), "Target 'build': writing output");
        assert_eq!(format!("{err:#}"), "Target 'build': writing output: disk full");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk full"));

        let wrapped = anyhow::Error::new(err.clone());
        assert_eq!(
            format!("{wrapped:#}"),
            "Target 'build': writing output: disk full"
        );
        assert_eq!(wrapped.chain().count(), 2);

        let lint = TaskError::new("lint", anyhow::anyhow!("x"));
        let many = DepsError::from_failures(vec![err, lint]).unwrap();
        assert!(many.to_string().contains("writing output: disk full"));
    }

    #[test]
    fn test_sh_error() {
        let err = ShError::Exit {
            cmd: "false".into(),
            code: 2,
        };
        assert!(err.ran());
        assert_eq!(exit_status(Some(&err)), 2);

        let err = ShError::Spawn {
            cmd: "nope".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!err.ran());
        assert_eq!(err.exit_status(), GENERIC_FAILURE);
    }
}
