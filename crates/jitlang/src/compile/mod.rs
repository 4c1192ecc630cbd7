//! Compilation visitor and bytecode interpreter (`spec.md` §4.4, component
//! C6, plus the "Emitter interface" and "Object runtime interface" from §6).
//!
//! [`compile_module_root`] assembles a module's top-level statements once,
//! on the `Analyzed -> Imported` transition. [`compile_function_fragment`] is
//! the callback [`crate::dispatch::jit_compile_scope`] calls the first time a
//! function is reached with a new argument-type tuple; its result is a
//! [`crate::ids::FragmentIndex`] the dispatcher resolves against from then on.

pub mod bytecode;
pub mod vm;
mod visitor;

use crate::{
    context::global::GlobalContext,
    error::{CompileError, CompileErrorKind, RuntimeException, RuntimeExceptionKind},
    ids::{FragmentIndex, FunctionId},
    tracer::JitTracer,
    value::Value,
};
use visitor::FragmentCompiler;

/// Resolves a fragment's final `return_type` from the return values
/// `analyze::infer_fragment_return_types` collected for it (`spec.md` §4.4
/// C6): an empty set returns `None`, exactly one value is the return type,
/// more than one is an unresolvable ambiguity, and a still-`Indeterminate`
/// result means the body's return(s) never pinned down a concrete type.
/// Ordinary (non-`__init__`) functions with an annotated return type must
/// additionally match it.
fn finalize_return_type(
    return_types: &[Value],
    annotated: Option<&Value>,
    is_init: bool,
    classes: &ahash::AHashMap<crate::ids::ClassId, crate::context::class::ClassContext>,
) -> Result<Value, CompileError> {
    let resolved = match return_types.len() {
        0 => Value::none(),
        1 => return_types[0].clone(),
        _ => {
            return Err(CompileError::new(
                CompileErrorKind::FragmentResolution,
                "function returns more than one type; fragment resolution is ambiguous",
            ));
        }
    };
    if resolved.is_indeterminate() {
        return Err(CompileError::new(
            CompileErrorKind::FragmentResolution,
            "function's return type is still indeterminate after compilation",
        ));
    }
    if !is_init
        && let Some(expected) = annotated
        && crate::dispatch::match_value_to_type(expected, &resolved, classes) < 0
    {
        return Err(CompileError::new(
            CompileErrorKind::FragmentResolution,
            format!("returned {:?} does not match the annotated return type {:?}", resolved.kind(), expected.kind()),
        ));
    }
    Ok(resolved)
}

/// Compiles the module's root fragment from its top-level statements. A
/// no-op if it was already compiled (re-importing an already-`Imported`
/// module never recompiles).
pub fn compile_module_root<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, tracer: &Tr) -> Result<(), CompileError> {
    if global.modules.get(module_name).is_some_and(|m| m.root_fragment.is_compiled()) {
        return Ok(());
    }

    tracer.on_fragment_compile_start(None, 0);
    let body = global
        .modules
        .get(module_name)
        .expect("module exists")
        .ast_root
        .clone()
        .expect("module parsed before compilation")
        .body;
    let num_splits = global.modules.get(module_name).expect("module exists").root_fragment_num_splits;

    let mut compiler = {
        let module = global.modules.get(module_name).expect("module exists");
        FragmentCompiler::new(&global.classes, module, None, None, &mut global.next_callsite_token, &mut global.callsites)
    };
    compiler.visit_block(&body)?;
    compiler.builder.emit_push_none();
    compiler.builder.emit_return();
    let (bytes, labels, unicode_consts) = compiler.builder.build();
    let split_labels = compiler.split_labels;
    let bytes_len = bytes.len();

    let module = global.modules.get_mut(module_name).expect("module exists");
    module.root_fragment.compiled_bytes = Some(bytes);
    module.root_fragment.compiled_labels = labels;
    module.root_fragment.compiled_unicode_consts = unicode_consts;
    module.root_fragment.call_split_labels = split_labels;
    module.root_fragment.resolve_call_split_labels(num_splits);
    module.compiled_bytes_total += bytes_len;

    tracer.on_fragment_compile_finish(None, 0, bytes_len);
    Ok(())
}

/// `compile_fn` for [`crate::dispatch::jit_compile_scope`]: compiles a fresh
/// [`crate::context::function::Fragment`] for `function_id` specialized to
/// `arg_types`, returning its index once emission succeeds.
pub fn compile_function_fragment<Tr: JitTracer>(
    global: &mut GlobalContext,
    function_id: FunctionId,
    arg_types: Vec<Value>,
    tracer: &Tr,
) -> Result<FragmentIndex, RuntimeException> {
    let missing = || RuntimeException::simple(RuntimeExceptionKind::PyJitCompilerError, format!("no such function id {}", function_id.raw()));

    let (def, module_name, class_id, num_splits, local_names, is_init, annotated_return_type) = {
        let func = global.functions.get(&function_id).ok_or_else(missing)?;
        let def = func.ast_root.clone().ok_or_else(missing)?;
        let module_name = func.module.clone().ok_or_else(missing)?;
        let local_names: Vec<String> = func.locals.iter().map(|(name, _)| name.clone()).collect();
        (
            def,
            module_name,
            func.class_id,
            func.num_splits,
            local_names,
            func.is_class_init(),
            func.annotated_return_type.clone(),
        )
    };

    let to_jit_error = |e: CompileError| RuntimeException::jit_compiler_error(0, module_name.clone(), e.offset.unwrap_or(0), e.message);

    let return_types = crate::analyze::infer_fragment_return_types(global, function_id, &arg_types, tracer).map_err(to_jit_error)?;
    let resolved_return = finalize_return_type(&return_types, annotated_return_type.as_ref(), is_init, &global.classes).map_err(to_jit_error)?;

    let fragment_index = global
        .functions
        .get_mut(&function_id)
        .ok_or_else(missing)?
        .push_fragment(arg_types);
    tracer.on_fragment_compile_start(Some(function_id), fragment_index.index());

    let compile_result = {
        let module = global.modules.get(&module_name).ok_or_else(missing)?;
        let mut compiler = FragmentCompiler::new(&global.classes, module, class_id, Some(&local_names), &mut global.next_callsite_token, &mut global.callsites);
        let result = compiler.visit_block(&def.body);
        result.map(|()| {
            compiler.builder.emit_push_none();
            compiler.builder.emit_return();
            (compiler.builder.build(), compiler.split_labels)
        })
    };

    let ((bytes, labels, unicode_consts), split_labels) = compile_result.map_err(to_jit_error)?;
    let bytes_len = bytes.len();

    let func = global.functions.get_mut(&function_id).ok_or_else(missing)?;
    let fragment = func.fragment_mut(fragment_index);
    fragment.compiled_bytes = Some(bytes);
    fragment.compiled_labels = labels;
    fragment.compiled_unicode_consts = unicode_consts;
    fragment.call_split_labels = split_labels;
    fragment.resolve_call_split_labels(num_splits);
    fragment.return_type = resolved_return;

    tracer.on_fragment_compile_finish(Some(function_id), fragment_index.index(), bytes_len);
    Ok(fragment_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Expr, ExprKind, Module as AstModule, Stmt, StmtKind},
        context::module::ModuleContext,
        tracer::NoopTracer,
    };

    fn int_lit(offset: usize, v: i64) -> Expr {
        Expr::new(offset, ExprKind::Int(v))
    }

    #[test]
    fn compiles_and_runs_a_simple_assignment() {
        let mut global = GlobalContext::new(vec![]);
        let mut module = ModuleContext::new_source("m".into(), String::new());
        module.declare_global("x", crate::context::module::GlobalFlags::MUTABLE);
        module.ast_root = Some(AstModule {
            body: vec![Stmt::new(
                0,
                StmtKind::Assign {
                    targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                    value: int_lit(4, 7),
                },
            )],
        });
        module.global_space = vec![None];
        global.modules.insert("m".into(), module);

        compile_module_root(&mut global, "m", &NoopTracer).unwrap();
        assert!(crate::compile::vm::run_fragment(&mut global, "m", &NoopTracer).is_none());

        let cell = global.modules.get("m").unwrap().global_space[0].clone();
        assert_eq!(cell, Some(crate::runtime::RuntimeValue::Int(7)));
    }
}
