//! Targets, the literal arguments they can be bound with, and the identity
//! used to run each of them only once.
use std::any::{TypeId, type_name};
use std::fmt::{self, Write};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::context::Context;
use crate::error::BindError;

/// Kinds of literal arguments a target can be bound with. The set is closed,
/// every kind has a stable serialized form used in the task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Int,
    Bool,
    Str,
    Duration,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::Int => "int",
            ArgKind::Bool => "bool",
            ArgKind::Str => "string",
            ArgKind::Duration => "duration",
        })
    }
}

/// A literal argument bound to a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Arg {
    Int(i64),
    Bool(bool),
    Str(String),
    Duration(Duration),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Int(_) => ArgKind::Int,
            Arg::Bool(_) => ArgKind::Bool,
            Arg::Str(_) => ArgKind::Str,
            Arg::Duration(_) => ArgKind::Duration,
        }
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<Duration> for Arg {
    fn from(value: Duration) -> Self {
        Arg::Duration(value)
    }
}

// Durations are written as whole nanoseconds.
impl Serialize for Arg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Arg::Int(value) => serializer.serialize_i64(*value),
            Arg::Bool(value) => serializer.serialize_bool(*value),
            Arg::Str(value) => serializer.serialize_str(value),
            Arg::Duration(value) => {
                serializer.serialize_u64(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX))
            }
        }
    }
}

/// Builds a `Vec<Arg>` out of literals of mixed kinds.
///
/// ```
/// use std::time::Duration;
/// let args = shigoto::args![1, "linux", true, Duration::from_secs(2)];
/// assert_eq!(args.len(), 4);
/// ```
#[macro_export]
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        ::std::vec::Vec::<$crate::Arg>::from([$($crate::Arg::from($arg)),*])
    };
}

/// What a single parameter of a target accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Exactly one argument of the kind.
    One(ArgKind),
    /// Every remaining argument, each of the kind.
    Rest(ArgKind),
}

mod sealed {
    pub trait Sealed {}
}

/// Types which can appear as target parameters: `i64`, `bool`, `String`,
/// `Duration`, and a trailing `Vec` of any of those.
pub trait Param: sealed::Sealed + Clone + Send + Sync + 'static {
    const KIND: ParamKind;

    #[doc(hidden)]
    fn take(cursor: &mut Cursor) -> Result<Self, BindError>;
}

/// Walks the literal arguments while they are converted into parameters.
#[doc(hidden)]
pub struct Cursor {
    name: Arc<str>,
    args: std::vec::IntoIter<Arg>,
    position: usize,
    expected: usize,
}

impl Cursor {
    fn next(&mut self) -> Result<Arg, BindError> {
        let arg = self.args.next().ok_or_else(|| BindError::Arity {
            name: self.name.to_string(),
            expected: self.expected,
            given: self.position,
        })?;
        self.position += 1;
        Ok(arg)
    }

    fn next_rest(&mut self) -> Option<Arg> {
        let arg = self.args.next()?;
        self.position += 1;
        Some(arg)
    }

    fn mismatch(&self, expected: ArgKind, given: &Arg) -> BindError {
        BindError::Kind {
            name: self.name.to_string(),
            position: self.position - 1,
            expected,
            given: given.kind(),
        }
    }
}

macro_rules! impl_param {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}

        impl Param for $ty {
            const KIND: ParamKind = ParamKind::One(ArgKind::$kind);

            fn take(cursor: &mut Cursor) -> Result<Self, BindError> {
                match cursor.next()? {
                    Arg::$kind(value) => Ok(value),
                    other => Err(cursor.mismatch(ArgKind::$kind, &other)),
                }
            }
        }

        impl sealed::Sealed for Vec<$ty> {}

        impl Param for Vec<$ty> {
            const KIND: ParamKind = ParamKind::Rest(ArgKind::$kind);

            fn take(cursor: &mut Cursor) -> Result<Self, BindError> {
                let mut rest = Vec::new();
                while let Some(arg) = cursor.next_rest() {
                    match arg {
                        Arg::$kind(value) => rest.push(value),
                        other => return Err(cursor.mismatch(ArgKind::$kind, &other)),
                    }
                }
                Ok(rest)
            }
        }
    };
}

impl_param!(i64, Int);
impl_param!(bool, Bool);
impl_param!(String, Str);
impl_param!(Duration, Duration);

/// Marker for types used as a namespace receiver. A target written as a
/// method taking `self` is grouped under the type's name, and the engine
/// passes a `Default` value for the receiver.
///
/// ```
/// #[derive(Default)]
/// struct Docs;
/// impl shigoto::Namespace for Docs {}
///
/// impl Docs {
///     fn build(self) {}
/// }
///
/// let task = shigoto::Task::of(Docs::build).unwrap();
/// assert!(task.name().ends_with("Docs:build"));
/// ```
pub trait Namespace: Default + Send + Sync + 'static {}

/// Values a target may return: `()` or `Result<(), E>` for any error which
/// converts into `anyhow::Error`.
pub trait Outcome {
    fn into_result(self) -> anyhow::Result<()>;
}

impl Outcome for () {
    fn into_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E> Outcome for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}

/// Type-erased invocation of a target with its arguments already bound.
pub(crate) type Invoke = Arc<dyn Fn(&Context) -> anyhow::Result<()> + Send + Sync>;

/// Functions usable as targets.
///
/// Implemented for every `Fn` taking, in order: an optional [`Namespace`]
/// receiver, an optional [`Context`], and up to six [`Param`]s; and returning
/// an [`Outcome`]. The `M` parameter only tells these shapes apart.
pub trait Target<M>: Send + Sync + 'static {
    #[doc(hidden)]
    fn params() -> Vec<ParamKind>;

    #[doc(hidden)]
    fn into_invoke(self, cursor: &mut Cursor) -> Result<Invoke, BindError>;
}

#[doc(hidden)]
pub struct Plain;

#[doc(hidden)]
pub struct WithContext;

#[doc(hidden)]
pub struct WithNamespace<N>(PhantomData<fn() -> N>);

#[doc(hidden)]
pub struct WithNamespaceContext<N>(PhantomData<fn() -> N>);

macro_rules! impl_target {
    ($($P:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, R, $($P),*> Target<(Plain, ($($P,)*))> for F
        where
            F: Fn($($P),*) -> R + Send + Sync + 'static,
            R: Outcome,
            $($P: Param,)*
        {
            fn params() -> Vec<ParamKind> {
                vec![$($P::KIND),*]
            }

            fn into_invoke(self, cursor: &mut Cursor) -> Result<Invoke, BindError> {
                $(let $P = $P::take(cursor)?;)*
                Ok(Arc::new(move |_: &Context| (self)($($P.clone()),*).into_result()))
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, R, $($P),*> Target<(WithContext, ($($P,)*))> for F
        where
            F: Fn(Context, $($P),*) -> R + Send + Sync + 'static,
            R: Outcome,
            $($P: Param,)*
        {
            fn params() -> Vec<ParamKind> {
                vec![$($P::KIND),*]
            }

            fn into_invoke(self, cursor: &mut Cursor) -> Result<Invoke, BindError> {
                $(let $P = $P::take(cursor)?;)*
                Ok(Arc::new(move |ctx: &Context| {
                    (self)(ctx.clone(), $($P.clone()),*).into_result()
                }))
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, R, N, $($P),*> Target<(WithNamespace<N>, ($($P,)*))> for F
        where
            F: Fn(N, $($P),*) -> R + Send + Sync + 'static,
            R: Outcome,
            N: Namespace,
            $($P: Param,)*
        {
            fn params() -> Vec<ParamKind> {
                vec![$($P::KIND),*]
            }

            fn into_invoke(self, cursor: &mut Cursor) -> Result<Invoke, BindError> {
                $(let $P = $P::take(cursor)?;)*
                Ok(Arc::new(move |_: &Context| (self)(N::default(), $($P.clone()),*).into_result()))
            }
        }

        #[allow(non_snake_case, unused_variables)]
        impl<F, R, N, $($P),*> Target<(WithNamespaceContext<N>, ($($P,)*))> for F
        where
            F: Fn(N, Context, $($P),*) -> R + Send + Sync + 'static,
            R: Outcome,
            N: Namespace,
            $($P: Param,)*
        {
            fn params() -> Vec<ParamKind> {
                vec![$($P::KIND),*]
            }

            fn into_invoke(self, cursor: &mut Cursor) -> Result<Invoke, BindError> {
                $(let $P = $P::take(cursor)?;)*
                Ok(Arc::new(move |ctx: &Context| {
                    (self)(N::default(), ctx.clone(), $($P.clone()),*).into_result()
                }))
            }
        }
    };
}

impl_target!();
impl_target!(A);
impl_target!(A, B);
impl_target!(A, B, C);
impl_target!(A, B, C, D);
impl_target!(A, B, C, D, E);
impl_target!(A, B, C, D, E, G);

/// Identity of a task for run-once purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    name: Arc<str>,
    id: Arc<str>,
}

impl Key {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if &*self.id == NO_ARGS {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.id)
        }
    }
}

const NO_ARGS: &str = "[]";

/// A target together with its bound arguments.
///
/// Two tasks are the same task iff both their name and their id (the JSON
/// array of the arguments) are equal. A bare function and the same function
/// bound with no arguments are therefore the same task.
#[derive(Clone)]
pub struct Task {
    key: Key,
    invoke: Invoke,
}

impl Task {
    /// Binds a target which takes no arguments.
    pub fn of<F, M>(target: F) -> Result<Task, BindError>
    where
        F: Target<M>,
    {
        Self::bind(target, Vec::<Arg>::new())
    }

    /// Binds a target to literal arguments, checking their number and kinds
    /// against the target's parameters.
    pub fn bind<F, M, I>(target: F, args: I) -> Result<Task, BindError>
    where
        F: Target<M>,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        Self::named(display_name::<F>()?, target, args)
    }

    /// Like [`Task::bind`] with an explicit name instead of the one derived
    /// from the function's path.
    pub fn named<F, M, I>(name: impl Into<Arc<str>>, target: F, args: I) -> Result<Task, BindError>
    where
        F: Target<M>,
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let name: Arc<str> = name.into();
        let args: Vec<Arg> = args.into_iter().map(Into::into).collect();
        let params = F::params();

        check_arity(&name, &params, args.len())?;

        let id = serde_json::to_string(&args).map_err(|err| BindError::Serialize {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

        let mut cursor = Cursor {
            name: name.clone(),
            args: args.into_iter(),
            position: 0,
            expected: params.len(),
        };
        let invoke = target.into_invoke(&mut cursor)?;

        Ok(Task {
            key: Key {
                name,
                id: id.into(),
            },
            invoke,
        })
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.key.name.clone()
    }

    pub(crate) fn invoke(&self, ctx: &Context) -> anyhow::Result<()> {
        (self.invoke)(ctx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.key)
    }
}

fn check_arity(name: &str, params: &[ParamKind], given: usize) -> Result<(), BindError> {
    let variadic = params
        .iter()
        .position(|param| matches!(param, ParamKind::Rest(_)));

    match variadic {
        Some(position) if position + 1 != params.len() => Err(BindError::VariadicNotLast {
            name: name.to_owned(),
            position,
        }),
        Some(position) if given < position => Err(BindError::ArityVariadic {
            name: name.to_owned(),
            expected: position,
            given,
        }),
        Some(_) => Ok(()),
        None if given != params.len() => Err(BindError::Arity {
            name: name.to_owned(),
            expected: params.len(),
            given,
        }),
        None => Ok(()),
    }
}

/// Display name of a target function, derived from its type name.
///
/// Function pointers and trait objects share one type between many
/// functions, so they have no name to derive.
fn display_name<F: 'static>() -> Result<String, BindError> {
    let raw = type_name::<F>();
    let bare = raw.trim_start_matches('&');
    let erased = ["fn(", "unsafe ", "extern ", "for<"]
        .iter()
        .any(|prefix| bare.starts_with(prefix));

    if erased || bare.contains("dyn ") {
        return Err(BindError::Unnamed {
            type_name: raw.to_string(),
        });
    }

    let mut name = normalize(bare);

    // Closures defined in the same function share a path.
    if name.contains("{{closure}}") {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<F>().hash(&mut hasher);
        let _ = write!(name, "#{:08x}", hasher.finish() as u32);
    }

    Ok(name)
}

/// Turns a Rust path into a target display name: the crate segment is
/// dropped and the remaining `::` separators become `:`.
///
/// `app::build` becomes `build`, `app::docs::Docs::serve` becomes
/// `docs:Docs:serve` and `<app::Docs as app::Serve>::serve` becomes
/// `Docs:serve`.
pub fn normalize(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix('<')
        && let Some((owner, rest)) = split_qualified(inner)
    {
        let owner = normalize(owner);
        return match rest.trim_start_matches("::") {
            "" => owner,
            rest => format!("{owner}:{}", separators(rest)),
        };
    }

    let head = &raw[..raw.find('<').unwrap_or(raw.len())];
    let path = match head.find("::") {
        Some(split) => &raw[split + 2..],
        None => raw,
    };

    separators(path)
}

/// Replaces `::` with `:` up to the first generic argument list.
fn separators(path: &str) -> String {
    let (head, generics) = path.split_at(path.find('<').unwrap_or(path.len()));
    format!("{}{generics}", head.replace("::", ":"))
}

/// Splits the inside of `<Owner as Trait>::rest` (without the leading `<`)
/// into `Owner` and `::rest`.
fn split_qualified(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let mut owner_end = None;
    let mut prev = ' ';

    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' if prev == '-' => {}
            '>' if depth == 0 => {
                let owner = &inner[..owner_end.unwrap_or(i)];
                return Some((owner, &inner[i + 1..]));
            }
            '>' => depth -= 1,
            ' ' if depth == 0 && owner_end.is_none() && inner[i..].starts_with(" as ") => {
                owner_end = Some(i);
            }
            _ => {}
        }
        prev = c;
    }

    None
}

/// Anything which can be turned into a dependency: a target function, a
/// bound [`Task`], or the result of binding one.
pub trait IntoDep<M> {
    fn into_dep(self) -> Result<Task, BindError>;
}

#[doc(hidden)]
pub struct Bare<M>(PhantomData<fn() -> M>);

#[doc(hidden)]
pub struct Bound;

#[doc(hidden)]
pub struct Pending;

impl<F, M> IntoDep<Bare<M>> for F
where
    F: Target<M>,
{
    fn into_dep(self) -> Result<Task, BindError> {
        Task::of(self)
    }
}

impl IntoDep<Bound> for Task {
    fn into_dep(self) -> Result<Task, BindError> {
        Ok(self)
    }
}

impl IntoDep<Pending> for Result<Task, BindError> {
    fn into_dep(self) -> Result<Task, BindError> {
        self
    }
}

/// Converts a single dependency, used by the `deps!` family of macros.
pub fn dep<M>(dep: impl IntoDep<M>) -> Result<Task, BindError> {
    dep.into_dep()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn build() {}

    fn compile(_target: String) {}

    fn sleep_for(_count: i64, _pause: Duration) -> anyhow::Result<()> {
        Ok(())
    }

    fn tags(_release: bool, _tags: Vec<String>) {}

    fn broken_variadic(_flags: Vec<bool>, _name: String) {}

    fn with_context(_ctx: Context, _target: String) {}

    #[derive(Default)]
    struct Docs;

    impl Namespace for Docs {}

    impl Docs {
        fn serve(self, _ctx: Context, _port: i64) {}
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("app::build"), "build");
        assert_eq!(normalize("app::docs::Docs::serve"), "docs:Docs:serve");
        assert_eq!(
            normalize("app::build<alloc::string::String>"),
            "build<alloc::string::String>"
        );
        assert_eq!(normalize("standalone"), "standalone");
    }

    #[test]
    fn test_normalize_qualified_paths() {
        assert_eq!(normalize("<app::docs::Docs as app::Serve>::serve"), "docs:Docs:serve");
        assert_eq!(normalize("<app::Docs>::build"), "Docs:build");
        assert_eq!(
            normalize("<app::Docs<i64> as app::Serve<bool>>::serve"),
            "Docs<i64>:serve"
        );
    }

    #[test]
    fn test_names_follow_path() {
        let task = Task::of(build).unwrap();
        assert_eq!(task.name(), "task:tests:build");
        assert_eq!(task.id(), "[]");

        let task = Task::bind(Docs::serve, [8080]).unwrap();
        assert_eq!(task.name(), "task:tests:Docs:serve");
        assert_eq!(task.id(), "[8080]");
    }

    #[test]
    fn test_id_serialization() {
        let task = Task::bind(sleep_for, args![3, Duration::from_millis(5)]).unwrap();
        assert_eq!(task.id(), "[3,5000000]");

        let task = Task::bind(tags, args![true, "a", "b"]).unwrap();
        assert_eq!(task.id(), r#"[true,"a","b"]"#);
        assert_eq!(task.key().to_string(), r#"task:tests:tags[true,"a","b"]"#);
    }

    #[test]
    fn test_distinct_args_distinct_keys() {
        let linux = Task::bind(compile, ["linux"]).unwrap();
        let darwin = Task::bind(compile, ["darwin"]).unwrap();
        assert_eq!(linux.name(), darwin.name());
        assert_ne!(linux.key(), darwin.key());
    }

    #[test]
    fn test_bare_and_bound_share_key() {
        let bare = dep(build).unwrap();
        let bound = Task::bind(build, Vec::<Arg>::new()).unwrap();
        assert_eq!(bare.key(), bound.key());
    }

    #[test]
    fn test_wrong_arity() {
        let err = Task::of(compile).unwrap_err();
        assert_eq!(
            err,
            BindError::Arity {
                name: "task:tests:compile".into(),
                expected: 1,
                given: 0,
            }
        );

        let err = Task::bind(build, ["extra"]).unwrap_err();
        assert!(matches!(err, BindError::Arity { expected: 0, given: 1, .. }));
    }

    #[test]
    fn test_wrong_kind() {
        let err = Task::bind(sleep_for, args!["three", Duration::from_secs(1)]).unwrap_err();
        assert!(matches!(
            err,
            BindError::Kind {
                position: 0,
                expected: ArgKind::Int,
                given: ArgKind::Str,
                ..
            }
        ));

        let err = Task::bind(tags, args![false, "a", 2]).unwrap_err();
        assert!(matches!(
            err,
            BindError::Kind {
                position: 2,
                expected: ArgKind::Str,
                given: ArgKind::Int,
                ..
            }
        ));
    }

    #[test]
    fn test_variadic() {
        assert!(Task::bind(tags, [true]).is_ok());
        assert!(matches!(
            Task::bind(tags, Vec::<Arg>::new()).unwrap_err(),
            BindError::ArityVariadic { expected: 1, given: 0, .. }
        ));
        assert!(matches!(
            Task::bind(broken_variadic, ["x"]).unwrap_err(),
            BindError::VariadicNotLast { position: 0, .. }
        ));
    }

    #[test]
    fn test_invoke_passes_arguments() {
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let task = Task::named(
            "record",
            move |ctx: Context, name: String, times: i64| {
                let target = ctx.current_target().unwrap_or_default().to_owned();
                sink.lock().unwrap().push(format!("{target}:{name}:{times}"));
            },
            args!["x", 2],
        )
        .unwrap();

        let ctx = Context::background().with_target("record");
        task.invoke(&ctx).unwrap();
        task.invoke(&ctx).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["record:x:2", "record:x:2"]);
    }

    #[test]
    fn test_invoke_translates_errors() {
        let fails = || -> anyhow::Result<()> { anyhow::bail!("nope") };
        let task = Task::named("fails", fails, Vec::<Arg>::new()).unwrap();
        let err = task.invoke(&Context::background()).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn test_context_target_binds() {
        assert!(Task::bind(with_context, ["x"]).is_ok());
        assert!(Task::of(with_context).is_err());
    }

    #[test]
    fn test_closures_get_distinct_names() {
        let a = Task::of(|| ()).unwrap();
        let b = Task::of(|| ()).unwrap();
        assert!(a.name().contains("{{closure}}"));
        assert_ne!(a.key(), b.key());
    }

    fn lint() {}

    fn vet() {}

    #[test]
    fn test_function_pointers_need_a_name() {
        let table: Vec<fn()> = vec![lint, vet];

        let err = Task::of(table[0]).unwrap_err();
        assert!(matches!(err, BindError::Unnamed { ref type_name } if type_name == "fn()"));
        assert!(Task::of(table[1]).is_err());

        let boxed: Box<dyn Fn() + Send + Sync> = Box::new(lint);
        assert!(matches!(Task::of(boxed), Err(BindError::Unnamed { .. })));

        let a = Task::named("lint", table[0], Vec::<Arg>::new()).unwrap();
        let b = Task::named("vet", table[1], Vec::<Arg>::new()).unwrap();
        assert_ne!(a.key(), b.key());
    }
}
