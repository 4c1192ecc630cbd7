//! Phase driver (`spec.md` §4.1, component C3).
//!
//! Drives a module through `Initial -> Parsed -> Annotated -> Analyzed ->
//! Imported` one transition at a time, stopping as soon as `target_phase` is
//! reached. A no-op if the module is already there or past it.

use crate::{
    context::{
        global::GlobalContext,
        module::{GlobalFlags, Phase},
    },
    error::{CompileError, CompileErrorKind},
    runtime::RuntimeValue,
    tracer::JitTracer,
    value::{Kind, Known},
};

/// `advance_module` (`spec.md` §4.1). Cycle detection and the scope-in-
/// progress token live here; static initialization runs as the last step of
/// `Annotated -> Analyzed`.
pub fn advance_module<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, target_phase: Phase, tracer: &Tr) -> Result<(), CompileError> {
    let current = global
        .modules
        .get(module_name)
        .map(|m| m.phase)
        .ok_or_else(|| CompileError::new(CompileErrorKind::Cycle, format!("no such module '{module_name}'")))?;
    if current >= target_phase {
        return Ok(());
    }

    global.mark_scope_entered(module_name)?;

    let mut phase = current;
    let result = loop {
        if phase >= target_phase {
            break Ok(());
        }
        match step(global, module_name, phase, tracer) {
            Ok(next) => {
                tracer.on_phase_transition(module_name, phase, next);
                if let Some(m) = global.modules.get_mut(module_name) {
                    m.phase = next;
                }
                phase = next;
            }
            Err(e) => break Err(e),
        }
    };
    global.mark_scope_exited(module_name);
    result
}

fn step<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, from: Phase, tracer: &Tr) -> Result<Phase, CompileError> {
    match from {
        Phase::Initial => {
            let is_builtin = global.modules.get(module_name).is_some_and(|m| m.is_builtin());
            if !is_builtin {
                let source = global.modules.get(module_name).and_then(|m| m.source.clone()).unwrap_or_default();
                let ast = crate::parser::parse(&source)?;
                if let Some(m) = global.modules.get_mut(module_name) {
                    m.ast_root = Some(ast);
                }
            }
            Ok(Phase::Parsed)
        }
        Phase::Parsed => {
            crate::annotate::annotate_module(global, module_name, tracer)?;
            Ok(Phase::Annotated)
        }
        Phase::Annotated => {
            crate::analyze::analyze_module(global, module_name, tracer)?;
            initialize_global_space(global, module_name)?;
            Ok(Phase::Analyzed)
        }
        Phase::Analyzed => {
            compile_and_run_root(global, module_name, tracer)?;
            Ok(Phase::Imported)
        }
        Phase::Imported => unreachable!("advance_module stops before stepping past the target"),
    }
}

/// Materializes every `StaticInitialize` global into `global_space`
/// (`spec.md` §4.1 "Static initialization"). Every slot is written by the
/// end, even those without the flag (zeroed to `RuntimeValue::None`).
fn initialize_global_space(global: &mut GlobalContext, module_name: &str) -> Result<(), CompileError> {
    let entries: Vec<_> = global
        .modules
        .get(module_name)
        .expect("module exists")
        .globals
        .values()
        .map(|g| (g.index, g.value.clone(), g.flags))
        .collect();

    let mut space = vec![None; entries.len()];
    for (index, value, flags) in entries {
        let cell = if flags.static_initialize {
            Some(materialize(global, &value, flags)?)
        } else {
            Some(RuntimeValue::None)
        };
        space[index.index()] = cell;
    }

    let module = global.modules.get_mut(module_name).expect("module exists");
    module.global_space = space;
    Ok(())
}

fn materialize(global: &mut GlobalContext, value: &crate::value::Value, flags: GlobalFlags) -> Result<RuntimeValue, CompileError> {
    let share = global.config.share_constants && !flags.mutable;
    match (value.kind(), value.known()) {
        (Kind::None, _) => Ok(RuntimeValue::None),
        (Kind::Bool, Some(Known::Bool(b))) => Ok(RuntimeValue::Bool(*b)),
        (Kind::Int, Some(Known::Int(i))) => Ok(RuntimeValue::Int(*i)),
        (Kind::Float, Some(Known::Float(f))) => Ok(RuntimeValue::Float(*f)),
        (Kind::Bytes, Some(Known::Bytes(b))) => {
            global.intern_bytes(b, share);
            Ok(RuntimeValue::Int(0))
        }
        (Kind::Unicode, Some(Known::Unicode(s))) => {
            global.intern_unicode(s, share);
            Ok(RuntimeValue::Int(0))
        }
        (Kind::List(_), Some(Known::List(_)) | None) | (Kind::Dict(..), Some(Known::Dict(_)) | None) => {
            // Runtime list/dict construction goes through the object runtime at
            // execution time; static init here only needs the cell reserved.
            Ok(RuntimeValue::Int(0))
        }
        (Kind::Function(id), _) => Ok(RuntimeValue::Int(id.raw())),
        (Kind::Class(id), _) => Ok(RuntimeValue::Int(id.raw())),
        (Kind::Set(_) | Kind::Tuple(_), _) => Err(CompileError::new(
            CompileErrorKind::Analysis,
            "unimplemented: static Set/Tuple initializer",
        )),
        _ => Ok(RuntimeValue::None),
    }
}

/// `Analyzed -> Imported`: compiles the module root fragment (C6) and
/// executes it; a non-null exception result is a fatal load-time error.
fn compile_and_run_root<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, tracer: &Tr) -> Result<(), CompileError> {
    crate::compile::compile_module_root(global, module_name, tracer)?;
    if let Some(exc) = crate::compile::vm::run_fragment(global, module_name, tracer) {
        let source = global.modules.get(module_name).and_then(|m| m.source.as_deref()).map(str::to_owned);
        let message = CompileError::new(CompileErrorKind::Analysis, format!("uncaught {exc} during module load"));
        return Err(match source {
            Some(src) => CompileError::new(message.kind, message.render(module_name, Some(&src))),
            None => message,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Module as AstModule, context::module::ModuleContext};

    #[test]
    fn reentrant_advance_on_same_module_is_detected() {
        let mut global = GlobalContext::new(vec![]);
        global.modules.insert("a".into(), {
            let mut m = ModuleContext::new_source("a".into(), String::new());
            m.ast_root = Some(AstModule { body: vec![] });
            m
        });
        global.mark_scope_entered("a").unwrap();
        let err = advance_module(&mut global, "a", Phase::Parsed, &crate::tracer::NoopTracer).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Cycle);
    }

    #[test]
    fn static_set_literal_at_module_scope_is_rejected() {
        let mut global = GlobalContext::new(vec![]);
        global.get_or_create_module("m", "S = {1, 2, 3}\n".to_owned());
        let err = advance_module(&mut global, "m", Phase::Analyzed, &crate::tracer::NoopTracer).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Analysis);
    }

    #[test]
    fn advancing_past_target_is_a_noop() {
        let mut global = GlobalContext::new(vec![]);
        let mut m = ModuleContext::new_source("a".into(), String::new());
        m.ast_root = Some(AstModule { body: vec![] });
        m.phase = Phase::Analyzed;
        global.modules.insert("a".into(), m);
        advance_module(&mut global, "a", Phase::Parsed, &crate::tracer::NoopTracer).unwrap();
        assert_eq!(global.modules.get("a").unwrap().phase, Phase::Analyzed);
    }
}
