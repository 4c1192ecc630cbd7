//! Function context and fragment storage (`spec.md` §3 "Function context",
//! "Fragment").

use ahash::AHashSet;

use crate::{
    ast::FunctionDef,
    context::class::ClassContext,
    ids::{ClassId, FunctionId, FragmentIndex, SplitId},
    value::Value,
};

/// One declared parameter: name, optional default expression's inferred
/// value, and optional type annotation value.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub default: Option<Value>,
    pub type_annotation: Option<Value>,
}

/// A compiled specialization of a function (or of a module root) for one
/// concrete argument-type tuple (`spec.md` §3 "Fragment").
#[derive(Debug, Clone)]
pub struct Fragment {
    /// `None` for a module root fragment.
    pub function: Option<FunctionId>,
    pub index: FragmentIndex,
    pub arg_types: Vec<Value>,
    pub return_type: Value,
    /// The assembled machine (stack-bytecode) representation, once emission
    /// completes. `None` while the fragment is mid-compile.
    pub compiled_bytes: Option<Vec<u8>>,
    /// Byte offset → label, for every label the emitter placed.
    pub compiled_labels: Vec<(usize, String)>,
    /// Unicode constants referenced by `PushUnicodeConst`, indexed by the
    /// constant index baked into the bytecode.
    pub compiled_unicode_consts: Vec<String>,
    /// Split id → label name, recorded while walking the body.
    pub call_split_labels: Vec<(SplitId, String)>,
    /// Split id → resolved byte offset. `None` means the split was never
    /// materialized because emission terminated early (`spec.md` §4.4
    /// "Early termination by split").
    pub call_split_offsets: Vec<Option<usize>>,
}

impl Fragment {
    #[must_use]
    pub fn new(function: Option<FunctionId>, index: FragmentIndex, arg_types: Vec<Value>) -> Self {
        Self {
            function,
            index,
            arg_types,
            return_type: Value::indeterminate(),
            compiled_bytes: None,
            compiled_labels: Vec::new(),
            compiled_unicode_consts: Vec::new(),
            call_split_labels: Vec::new(),
            call_split_offsets: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.compiled_bytes.is_some()
    }

    /// Resolves every recorded `call_split_labels` entry against
    /// `compiled_labels`, populating `call_split_offsets`. Splits with no
    /// matching label (never emitted because of early termination) resolve
    /// to `None`.
    pub fn resolve_call_split_labels(&mut self, num_splits: usize) {
        let mut offsets = vec![None; num_splits];
        for (split_id, label) in &self.call_split_labels {
            if let Some((offset, _)) = self.compiled_labels.iter().find(|(_, l)| l == label) {
                offsets[split_id.index()] = Some(*offset);
            }
        }
        self.call_split_offsets = offsets;
    }
}

/// A defined function's static metadata, independent of any particular
/// argument-type specialization (`spec.md` §3 "Function context").
#[derive(Debug)]
pub struct FunctionContext {
    pub id: FunctionId,
    /// Owning module name; `None` only for a handful of process-wide
    /// built-ins with no home module.
    pub module: Option<String>,
    /// Id of the class this is a method of; `None` for free functions. A
    /// function whose id equals its class's id is that class's `__init__`.
    pub class_id: Option<ClassId>,
    pub name: String,
    pub ast_root: Option<FunctionDef>,
    pub args: Vec<Argument>,
    pub varargs_name: Option<String>,
    pub varkwargs_name: Option<String>,
    pub explicit_globals: AHashSet<String>,
    pub locals: Vec<(String, Value)>,
    pub return_types: Vec<Value>,
    pub annotated_return_type: Option<Value>,
    pub num_splits: usize,
    pub fragments: Vec<Fragment>,
}

impl FunctionContext {
    #[must_use]
    pub fn new(id: FunctionId, module: Option<String>, class_id: Option<ClassId>, name: String) -> Self {
        Self {
            id,
            module,
            class_id,
            name,
            ast_root: None,
            args: Vec::new(),
            varargs_name: None,
            varkwargs_name: None,
            explicit_globals: AHashSet::new(),
            locals: Vec::new(),
            return_types: Vec::new(),
            annotated_return_type: None,
            num_splits: 0,
            fragments: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_class_init(&self) -> bool {
        self.class_id.is_some_and(|c| c.as_function_id() == self.id)
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.id.is_builtin()
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set_local(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.locals.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.locals.push((name.to_owned(), value));
        }
    }

    /// `fragment_index_for_call_args` (`spec.md` §4.5 "Fragment selection"):
    /// returns the index of the existing fragment with the lowest match
    /// score against `arg_types`, or `None` if no fragment matches.
    #[must_use]
    pub fn fragment_index_for_call_args(
        &self,
        arg_types: &[Value],
        classes: &ahash::AHashMap<ClassId, ClassContext>,
    ) -> Option<(FragmentIndex, i64)> {
        let mut best: Option<(FragmentIndex, i64)> = None;
        for fragment in &self.fragments {
            let score = crate::dispatch::match_values_to_types(&fragment.arg_types, arg_types, classes);
            if let Some(score) = score
                && best.is_none_or(|(_, best_score)| score < best_score)
            {
                best = Some((fragment.index, score));
            }
        }
        best
    }

    pub fn push_fragment(&mut self, arg_types: Vec<Value>) -> FragmentIndex {
        let index = FragmentIndex::new(self.fragments.len());
        self.fragments.push(Fragment::new(Some(self.id), index, arg_types));
        index
    }

    pub fn fragment(&self, index: FragmentIndex) -> &Fragment {
        &self.fragments[index.index()]
    }

    pub fn fragment_mut(&mut self, index: FragmentIndex) -> &mut Fragment {
        &mut self.fragments[index.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_labels_resolve_to_offsets() {
        let mut fragment = Fragment::new(None, FragmentIndex::new(0), vec![]);
        fragment.compiled_labels.push((10, "split0".to_owned()));
        fragment.call_split_labels.push((SplitId::new(0), "split0".to_owned()));
        fragment.call_split_labels.push((SplitId::new(1), "split1_never_emitted".to_owned()));
        fragment.resolve_call_split_labels(2);
        assert_eq!(fragment.call_split_offsets, vec![Some(10), None]);
    }
}
