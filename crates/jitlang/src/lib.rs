//! An ahead-of-need, just-in-time compiler for a dynamically typed scripting
//! language (`spec.md` §1 "Overview").
//!
//! A module moves through five phases — [`context::module::Phase`] — driven
//! one step at a time by [`phase::advance_module`]. Each user-level function
//! stays unreified until a callsite actually reaches it with a concrete
//! argument-type tuple, at which point [`dispatch::jit_compile_scope`] grows
//! it a [`context::function::Fragment`] specialized to that tuple via
//! [`compile::compile_function_fragment`]. "Ahead of need" names this
//! property: nothing is compiled before the first call that needs it, and
//! every later call with the same argument shapes reuses the fragment.
//!
//! ```text
//! source text --parser--> AST --annotate--> --analyze--> --compile--> bytecode
//!                                                              |
//!                                                   compile::vm executes it
//! ```

pub mod analyze;
pub mod annotate;
pub mod ast;
pub mod compile;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod ids;
pub mod parser;
pub mod phase;
mod recursion;
pub mod runtime;
pub mod tracer;
pub mod value;

pub use config::PipelineConfig;
pub use context::global::GlobalContext;
pub use error::{CompileError, CompileErrorKind, RuntimeException, RuntimeExceptionKind};
pub use ids::{ClassId, FragmentIndex, FunctionId};
pub use phase::advance_module;
pub use runtime::RuntimeValue;
pub use tracer::{JitTracer, NoopTracer, RecordingTracer, StderrTracer};

/// Loads `source` as module `name` and drives it through every phase up to
/// and including `Analyzed -> Imported`, which compiles and runs its root
/// fragment (`spec.md` §4.1, §4.9 "host entry point").
pub fn run_module<Tr: JitTracer>(global: &mut GlobalContext, name: &str, source: String, tracer: &Tr) -> Result<(), CompileError> {
    global.get_or_create_module(name, source);
    phase::advance_module(global, name, context::module::Phase::Imported, tracer)
}
