//! Fragment selection and the synchronous JIT dispatcher (`spec.md` §4.5,
//! component C7).

use ahash::AHashMap;

use crate::{
    context::{class::ClassContext, global::GlobalContext},
    error::RuntimeException,
    ids::{ClassId, FunctionId},
    value::{Kind, Value},
};

/// `match_value_to_type(expected, actual)` (`spec.md` §4.5, §9 "Fragment
/// selection"): `-1` on mismatch, else a non-negative promotion count. An
/// `Indeterminate` expected slot costs one promotion point and accepts
/// anything; a matching concrete type costs zero; an instance of a subclass
/// matches an expected superclass instance at zero cost; everything else
/// that doesn't structurally agree is a mismatch.
///
/// `actual` is never `Indeterminate` in a well-formed call: it comes from a
/// concrete argument at a callsite, not from a fragment signature.
#[must_use]
pub fn match_value_to_type(expected: &Value, actual: &Value, classes: &AHashMap<ClassId, ClassContext>) -> i64 {
    debug_assert!(!actual.is_indeterminate(), "actual call argument types must be concrete");

    if expected.is_indeterminate() {
        return 1;
    }
    match (expected.kind(), actual.kind()) {
        (Kind::Instance(expected_class), Kind::Instance(actual_class)) => {
            if is_subclass_or_equal(*actual_class, *expected_class, classes) {
                0
            } else {
                -1
            }
        }
        _ if expected.types_equal(actual) => 0,
        _ => -1,
    }
}

/// Walks `parent_class_id` from `candidate` looking for `ancestor`.
fn is_subclass_or_equal(candidate: ClassId, ancestor: ClassId, classes: &AHashMap<ClassId, ClassContext>) -> bool {
    let mut current = Some(candidate);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = classes.get(&id).and_then(|c| c.parent_class_id);
    }
    false
}

/// `match_values_to_types` (`spec.md` §4.5): sums per-argument match scores;
/// mismatched arity or any single mismatch fails the whole tuple.
#[must_use]
pub fn match_values_to_types(expected: &[Value], actual: &[Value], classes: &AHashMap<ClassId, ClassContext>) -> Option<i64> {
    if expected.len() != actual.len() {
        return None;
    }
    let mut total = 0i64;
    for (e, a) in expected.iter().zip(actual) {
        let score = match_value_to_type(e, a, classes);
        if score < 0 {
            return None;
        }
        total += score;
    }
    Some(total)
}

/// Outcome of driving a call through the dispatcher (`spec.md` §4.5 steps
/// 1-7): either the call was resolved to a fragment ready to run, or it
/// raised a reified runtime exception before getting there.
pub enum DispatchOutcome {
    Resolved {
        function_id: FunctionId,
        fragment_index: crate::ids::FragmentIndex,
    },
    Raised(RuntimeException),
}

/// `jit_compile_scope` (`spec.md` §4.5): resolves `callee_function_id` against
/// `arg_types`, compiling a fresh fragment via `compile_fn` if no existing
/// fragment matches closely enough. `compile_fn` performs C6 compilation and
/// is injected so this module stays independent of the compilation visitor.
pub fn jit_compile_scope<F>(
    global: &mut GlobalContext,
    callee_function_id: FunctionId,
    arg_types: &[Value],
    mut compile_fn: F,
) -> DispatchOutcome
where
    F: FnMut(&mut GlobalContext, FunctionId, Vec<Value>) -> Result<crate::ids::FragmentIndex, RuntimeException>,
{
    let Some(func) = global.functions.get(&callee_function_id) else {
        return DispatchOutcome::Raised(RuntimeException::simple(
            crate::error::RuntimeExceptionKind::PyJitCompilerError,
            format!("no such function id {}", callee_function_id.raw()),
        ));
    };

    if let Some((index, _score)) = func.fragment_index_for_call_args(arg_types, &global.classes) {
        return DispatchOutcome::Resolved {
            function_id: callee_function_id,
            fragment_index: index,
        };
    }

    match compile_fn(global, callee_function_id, arg_types.to_vec()) {
        Ok(fragment_index) => DispatchOutcome::Resolved {
            function_id: callee_function_id,
            fragment_index,
        },
        Err(exc) => DispatchOutcome::Raised(exc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClassId;

    #[test]
    fn indeterminate_expected_costs_one() {
        let classes = AHashMap::new();
        assert_eq!(match_value_to_type(&Value::indeterminate(), &Value::int_known(1), &classes), 1);
    }

    #[test]
    fn exact_match_is_free() {
        let classes = AHashMap::new();
        assert_eq!(match_value_to_type(&Value::int_type(), &Value::int_known(1), &classes), 0);
    }

    #[test]
    fn mismatched_concrete_types_fail() {
        let classes = AHashMap::new();
        assert_eq!(match_value_to_type(&Value::int_type(), &Value::unicode_known("x".into()), &classes), -1);
    }

    #[test]
    fn subclass_instance_matches_superclass_expectation() {
        let mut classes = AHashMap::new();
        let base = ClassId::new(1);
        let derived = ClassId::new(2);
        classes.insert(base, ClassContext::new(base, None, "B".into()));
        let mut derived_ctx = ClassContext::new(derived, None, "D".into());
        derived_ctx.parent_class_id = Some(base);
        classes.insert(derived, derived_ctx);

        let expected = Value::instance_type(base);
        let actual = Value::instance_type(derived);
        assert_eq!(match_value_to_type(&expected, &actual, &classes), 0);
    }

    #[test]
    fn arity_mismatch_fails_tuple_match() {
        let classes = AHashMap::new();
        assert_eq!(match_values_to_types(&[Value::int_type()], &[], &classes), None);
    }

    #[test]
    fn tuple_match_sums_scores() {
        let classes = AHashMap::new();
        let expected = [Value::indeterminate(), Value::int_type()];
        let actual = [Value::unicode_known("x".into()), Value::int_known(1)];
        assert_eq!(match_values_to_types(&expected, &actual, &classes), Some(1));
    }
}
