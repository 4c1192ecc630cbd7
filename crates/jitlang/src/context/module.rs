//! Module context and phase tracking (`spec.md` §3 "Module context", §4.1).

use crate::{ast::Module as AstModule, context::function::Fragment, ids::GlobalIndex, runtime::RuntimeValue, value::Value};

/// `ModuleContext::Phase` (`spec.md` §4.1). Monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
pub enum Phase {
    Initial,
    Parsed,
    Annotated,
    Analyzed,
    Imported,
}

/// Per-global flags (`spec.md` §3 "Module context").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalFlags {
    pub mutable: bool,
    pub static_initialize: bool,
}

impl GlobalFlags {
    pub const MUTABLE: Self = Self { mutable: true, static_initialize: false };
    pub const STATIC_INITIALIZE: Self = Self { mutable: false, static_initialize: true };
}

/// One module-level global's static metadata.
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub value: Value,
    pub index: GlobalIndex,
    pub flags: GlobalFlags,
}

/// A loaded module, tracked by the phase driver through Initial → Imported.
#[derive(Debug)]
pub struct ModuleContext {
    pub name: String,
    /// The raw source text; absent for built-in modules.
    pub source: Option<String>,
    pub phase: Phase,
    pub ast_root: Option<AstModule>,
    /// Ordered so that iteration order matches declaration order, which is
    /// what makes `global_space` indices predictable for debugging.
    pub globals: indexmap::IndexMap<String, GlobalVariable>,
    pub global_space: Vec<Option<RuntimeValue>>,
    pub root_fragment: Fragment,
    pub root_fragment_num_splits: usize,
    pub compiled_bytes_total: usize,
}

impl ModuleContext {
    #[must_use]
    pub fn new_source(name: String, source: String) -> Self {
        Self {
            name,
            source: Some(source),
            phase: Phase::Initial,
            ast_root: None,
            globals: indexmap::IndexMap::new(),
            global_space: Vec::new(),
            root_fragment: Fragment::new(None, crate::ids::FragmentIndex::new(0), Vec::new()),
            root_fragment_num_splits: 0,
            compiled_bytes_total: 0,
        }
    }

    /// Built-in modules start pre-parsed with no backing source text.
    #[must_use]
    pub fn new_builtin(name: String) -> Self {
        let mut m = Self::new_source(name, String::new());
        m.source = None;
        m.ast_root = Some(AstModule { body: Vec::new() });
        m.phase = Phase::Initial;
        m
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.source.is_none()
    }

    /// Creates a new global, seeded with `Value::indeterminate()` per the
    /// annotation visitor's contract, and returns its dense index.
    pub fn declare_global(&mut self, name: &str, flags: GlobalFlags) -> GlobalIndex {
        if let Some(existing) = self.globals.get(name) {
            return existing.index;
        }
        let index = GlobalIndex::new(self.globals.len());
        self.globals.insert(
            name.to_owned(),
            GlobalVariable {
                value: Value::indeterminate(),
                index,
                flags,
            },
        );
        index
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.get(name)
    }

    pub fn set_global_value(&mut self, name: &str, value: Value) {
        if let Some(g) = self.globals.get_mut(name) {
            g.value = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_global_is_idempotent() {
        let mut m = ModuleContext::new_source("m".into(), String::new());
        let a = m.declare_global("x", GlobalFlags::MUTABLE);
        let b = m.declare_global("x", GlobalFlags::MUTABLE);
        assert_eq!(a, b);
        assert_eq!(m.globals.len(), 1);
    }
}
