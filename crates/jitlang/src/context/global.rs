//! Global (process-wide) context (`spec.md` §3 "Global context").

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    config::PipelineConfig,
    context::{class::ClassContext, function::FunctionContext, module::ModuleContext},
    error::CompileError,
    ids::{CallsiteToken, ClassId, FunctionId},
    recursion::RecursionGuard,
    value::Value,
};

/// RAII guard marking a module as "currently being advanced", used for
/// `spec.md` §4.1 cycle detection. Dropping it clears the in-progress marker
/// even if the phase advance returns early via `?`.
pub struct ScopeGuard<'a> {
    scopes: &'a mut AHashSet<String>,
    name: String,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scopes.remove(&self.name);
    }
}

/// Process-wide state shared by every module: id allocation, interned
/// constant pools, and the module/function/class registries
/// (`spec.md` §3 "Global context").
#[derive(Debug)]
pub struct GlobalContext {
    pub import_paths: Vec<String>,
    pub modules: IndexMap<String, ModuleContext>,
    pub functions: AHashMap<FunctionId, FunctionContext>,
    pub classes: AHashMap<ClassId, ClassContext>,

    /// Deduplicated constant pools. When `config.share_constants` is false
    /// these are bypassed and every constant gets a fresh, unshared value.
    bytes_pool: AHashMap<Vec<u8>, usize>,
    unicode_pool: AHashMap<String, usize>,

    scopes_in_progress: AHashSet<String>,

    next_user_function_id: i64,
    next_builtin_function_id: i64,
    next_user_class_id: i64,
    next_builtin_class_id: i64,

    pub sentinel_classes: SentinelClasses,

    /// The single reference-counted object runtime backing every module's
    /// heap-allocated values (`spec.md` §6). Shared process-wide so an
    /// instance built in one module can be passed into another's functions.
    pub heap: crate::runtime::Heap,

    pub config: PipelineConfig,

    /// Bounds the dispatcher's synchronous re-entrancy depth at
    /// `config.max_recursion_depth` (`SPEC_FULL.md` §4.8).
    pub recursion: RecursionGuard,

    /// Per-callsite argument-type records, keyed by the token the
    /// compilation visitor stamps onto each `Call`/`Construct` opcode
    /// (`SPEC_FULL.md` §4.4 "Call sites"). Read back by
    /// `compile/vm.rs::dispatch_and_run` instead of reconstructing argument
    /// types from the popped runtime values.
    pub(crate) callsites: AHashMap<CallsiteToken, CallsiteRecord>,
    pub(crate) next_callsite_token: u64,
}

/// The statically inferred argument types for one callsite, recorded by the
/// compilation visitor when it emits that call's opcode.
#[derive(Debug, Clone)]
pub(crate) struct CallsiteRecord {
    pub(crate) arg_types: Vec<Value>,
}

/// Ids for the reserved exception and container classes every module can
/// reference without importing anything (`spec.md` §7, §3 "extension types").
#[derive(Debug, Clone, Copy)]
pub struct SentinelClasses {
    pub assertion_error: ClassId,
    pub index_error: ClassId,
    pub key_error: ClassId,
    pub os_error: ClassId,
    pub jit_compiler_error: ClassId,
    pub type_error: ClassId,
    pub value_error: ClassId,
    pub bytes: ClassId,
    pub unicode: ClassId,
    pub list: ClassId,
    pub tuple: ClassId,
    pub set: ClassId,
    pub dict: ClassId,
}

impl GlobalContext {
    #[must_use]
    pub fn new(import_paths: Vec<String>) -> Self {
        Self::new_with_config(PipelineConfig::with_import_paths(import_paths))
    }

    #[must_use]
    pub fn new_with_config(config: PipelineConfig) -> Self {
        let mut ctx = Self {
            import_paths: config.import_paths.clone(),
            modules: IndexMap::new(),
            functions: AHashMap::new(),
            classes: AHashMap::new(),
            bytes_pool: AHashMap::new(),
            unicode_pool: AHashMap::new(),
            scopes_in_progress: AHashSet::new(),
            next_user_function_id: 1,
            next_builtin_function_id: -1,
            next_user_class_id: 1,
            next_builtin_class_id: -1,
            heap: crate::runtime::Heap::new(),
            recursion: RecursionGuard::new(config.max_recursion_depth),
            callsites: AHashMap::new(),
            next_callsite_token: 0,
            config,
            sentinel_classes: SentinelClasses {
                assertion_error: ClassId::new(0),
                index_error: ClassId::new(0),
                key_error: ClassId::new(0),
                os_error: ClassId::new(0),
                jit_compiler_error: ClassId::new(0),
                type_error: ClassId::new(0),
                value_error: ClassId::new(0),
                bytes: ClassId::new(0),
                unicode: ClassId::new(0),
                list: ClassId::new(0),
                tuple: ClassId::new(0),
                set: ClassId::new(0),
                dict: ClassId::new(0),
            },
        };
        ctx.sentinel_classes = SentinelClasses {
            assertion_error: ctx.declare_builtin_class("AssertionError"),
            index_error: ctx.declare_builtin_class("IndexError"),
            key_error: ctx.declare_builtin_class("KeyError"),
            os_error: ctx.declare_builtin_class("OSError"),
            jit_compiler_error: ctx.declare_builtin_class("PyJitCompilerError"),
            type_error: ctx.declare_builtin_class("TypeError"),
            value_error: ctx.declare_builtin_class("ValueError"),
            bytes: ctx.declare_builtin_class("bytes"),
            unicode: ctx.declare_builtin_class("str"),
            list: ctx.declare_builtin_class("list"),
            tuple: ctx.declare_builtin_class("tuple"),
            set: ctx.declare_builtin_class("set"),
            dict: ctx.declare_builtin_class("dict"),
        };
        ctx
    }

    fn declare_builtin_class(&mut self, name: &str) -> ClassId {
        let id = ClassId::new(self.next_builtin_class_id);
        self.next_builtin_class_id -= 1;
        self.classes.insert(id, ClassContext::new(id, None, name.to_owned()));
        id
    }

    pub fn allocate_function_id(&mut self, is_builtin: bool) -> FunctionId {
        if is_builtin {
            let id = FunctionId::new(self.next_builtin_function_id);
            self.next_builtin_function_id -= 1;
            id
        } else {
            let id = FunctionId::new(self.next_user_function_id);
            self.next_user_function_id += 1;
            id
        }
    }

    pub fn allocate_class_id(&mut self, is_builtin: bool) -> ClassId {
        if is_builtin {
            let id = ClassId::new(self.next_builtin_class_id);
            self.next_builtin_class_id -= 1;
            id
        } else {
            let id = ClassId::new(self.next_user_class_id);
            self.next_user_class_id += 1;
            id
        }
    }

    /// Interns a byte-string constant, honoring `share_constants`. Returns a
    /// stable index into the bytes pool.
    pub fn intern_bytes(&mut self, bytes: &[u8], share: bool) -> usize {
        if share {
            if let Some(&idx) = self.bytes_pool.get(bytes) {
                return idx;
            }
        }
        let idx = self.bytes_pool.len();
        self.bytes_pool.insert(bytes.to_vec(), idx);
        idx
    }

    pub fn intern_unicode(&mut self, s: &str, share: bool) -> usize {
        if share {
            if let Some(&idx) = self.unicode_pool.get(s) {
                return idx;
            }
        }
        let idx = self.unicode_pool.len();
        self.unicode_pool.insert(s.to_owned(), idx);
        idx
    }

    pub fn get_or_create_module(&mut self, name: &str, source: String) -> &mut ModuleContext {
        self.modules
            .entry(name.to_owned())
            .or_insert_with(|| ModuleContext::new_source(name.to_owned(), source))
    }

    /// Marks `name` as in-progress, returning an error per `spec.md` §4.1 if
    /// it is already being advanced higher up the call stack (an import
    /// cycle), else an RAII guard that clears the marker on drop.
    pub fn enter_scope(&mut self, name: &str) -> Result<ScopeGuard<'_>, CompileError> {
        self.mark_scope_entered(name)?;
        Ok(ScopeGuard {
            scopes: &mut self.scopes_in_progress,
            name: name.to_owned(),
        })
    }

    /// Non-RAII half of [`Self::enter_scope`], for callers (like
    /// [`crate::phase::advance_module`]) that need `self` mutably available
    /// again before the scope is cleared and so can't hold onto a guard
    /// borrowing `self` for the whole in-progress duration. Pair with
    /// [`Self::mark_scope_exited`].
    pub(crate) fn mark_scope_entered(&mut self, name: &str) -> Result<(), CompileError> {
        if !self.scopes_in_progress.insert(name.to_owned()) {
            return Err(CompileError::new(
                crate::error::CompileErrorKind::Cycle,
                format!("import cycle detected while loading '{name}'"),
            ));
        }
        Ok(())
    }

    /// Clears the in-progress marker set by [`Self::mark_scope_entered`].
    pub(crate) fn mark_scope_exited(&mut self, name: &str) {
        self.scopes_in_progress.remove(name);
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionContext> {
        self.functions.get(&id)
    }

    pub fn function_mut(&mut self, id: FunctionId) -> Option<&mut FunctionContext> {
        self.functions.get_mut(&id)
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassContext> {
        self.classes.get(&id)
    }

    pub fn class_mut(&mut self, id: ClassId) -> Option<&mut ClassContext> {
        self.classes.get_mut(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_ids_alternate_sign_by_builtin_flag() {
        let mut ctx = GlobalContext::new(vec![]);
        let user = ctx.allocate_function_id(false);
        let builtin = ctx.allocate_function_id(true);
        assert!(!user.is_builtin());
        assert!(builtin.is_builtin());
    }

    #[test]
    fn reentrant_scope_is_rejected() {
        let mut ctx = GlobalContext::new(vec![]);
        ctx.mark_scope_entered("a").unwrap();
        assert!(ctx.enter_scope("a").is_err());
    }

    #[test]
    fn scope_guard_clears_on_drop() {
        let mut ctx = GlobalContext::new(vec![]);
        {
            let _guard = ctx.enter_scope("a").unwrap();
        }
        assert!(ctx.enter_scope("a").is_ok());
    }

    #[test]
    fn constant_sharing_dedups_identical_bytes() {
        let mut ctx = GlobalContext::new(vec![]);
        let a = ctx.intern_bytes(b"x", true);
        let b = ctx.intern_bytes(b"x", true);
        assert_eq!(a, b);
        let c = ctx.intern_bytes(b"x", false);
        assert_ne!(a, c);
    }
}
