//! Newtype identifiers used throughout the pipeline.
//!
//! Every cross-reference between contexts (module → function, fragment →
//! callsite, global slot → cell) goes through one of these ids rather than an
//! owning pointer, so contexts can be stored in flat maps on [`crate::context::global::GlobalContext`]
//! without creating ownership cycles.

/// Identifier for a [`crate::context::function::FunctionContext`].
///
/// Positive values are user-defined functions, issued monotonically from 1.
/// Negative values are reserved for built-in functions, issued monotonically
/// downward from -1. A function id of `k` that is also a class id names that
/// class's `__init__` (see [`ClassId`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(i64);

impl FunctionId {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_builtin(self) -> bool {
        self.0 < 0
    }
}

/// Identifier for a [`crate::context::class::ClassContext`].
///
/// A class with an `__init__` shares its numeric value with that function's
/// [`FunctionId`] — `ClassId(k).as_function_id() == FunctionId(k)` is how the
/// "constructor id equals class id" invariant is represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(i64);

impl ClassId {
    pub(crate) fn new(raw: i64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn as_function_id(self) -> FunctionId {
        FunctionId(self.0)
    }

    #[must_use]
    pub fn is_builtin(self) -> bool {
        self.0 < 0
    }
}

/// Dense index of a global variable's cell within a module's `global_space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalIndex(u32);

impl GlobalIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("global index overflow"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a compiled [`crate::context::function::Fragment`] within its owning function's
/// fragment vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentIndex(u32);

impl FragmentIndex {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("fragment index overflow"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A split id scoped to a single function (or the module root), identifying
/// the logical resume point immediately after one `FunctionCall` in that
/// function's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SplitId(u32);

impl SplitId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("split id overflow"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies one `Call`/`Construct` opcode's callsite record in
/// [`crate::context::global::GlobalContext::callsites`], allocated when the
/// compilation visitor emits that opcode and read back by the dispatcher
/// (`compile/vm.rs::dispatch_and_run`) to recover the statically inferred
/// argument types for that specific call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallsiteToken(u64);

impl CallsiteToken {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

