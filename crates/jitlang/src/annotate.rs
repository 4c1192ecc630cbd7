//! Annotation visitor (`spec.md` §4.2, component C4).
//!
//! A pre-order walk whose sole job is name and structure discovery: it
//! allocates function/class ids, assigns call-site split ids, and records
//! every *write* of a name into the nearest enclosing scope. It never infers
//! types — every name it creates is seeded with `Value::indeterminate()`.

use crate::{
    ast::{ExceptHandler, Expr, ExprKind, FunctionDef, Param, Stmt, StmtKind},
    context::{class::ClassContext, function::FunctionContext, global::GlobalContext, module::{GlobalFlags, ModuleContext}},
    error::{CompileError, CompileErrorKind},
    ids::{ClassId, FunctionId},
    tracer::JitTracer,
    value::Value,
};

/// Where the walk currently is, for routing name writes per `spec.md` §4.2
/// ("inside a function: locals ... inside a class body: attributes ...
/// otherwise: module global").
enum Scope {
    Module,
    Function(FunctionId),
    /// A class body, outside any method.
    Class(ClassId),
}

struct Annotator<'a, Tr: JitTracer> {
    global: &'a mut GlobalContext,
    module_name: String,
    scopes: Vec<Scope>,
    next_split_id: Vec<u32>,
    tracer: &'a Tr,
}

pub fn annotate_module<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, tracer: &Tr) -> Result<(), CompileError> {
    let body = {
        let module = global.modules.get(module_name).expect("module must exist before annotation");
        module.ast_root.clone().expect("Initial->Parsed must install an AST first")
    };

    let mut ann = Annotator {
        global,
        module_name: module_name.to_owned(),
        scopes: vec![Scope::Module],
        next_split_id: vec![0],
        tracer,
    };
    ann.visit_block(&body.body)?;
    Ok(())
}

impl<Tr: JitTracer> Annotator<'_, Tr> {
    fn current_scope(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }

    fn module_mut(&mut self) -> &mut ModuleContext {
        self.global.modules.get_mut(&self.module_name).expect("module was installed before annotation")
    }

    fn alloc_split_id(&mut self) -> u32 {
        let depth = self.next_split_id.len() - 1;
        let id = self.next_split_id[depth];
        self.next_split_id[depth] += 1;
        id
    }

    /// Records a write of `name` into the nearest enclosing scope
    /// (`spec.md` §4.2). Module-scope writes always declare the global
    /// `MUTABLE`; use `bind_write_with_flags` for the few module-scope
    /// writers (bare literal assignment, `def`, `class`) that qualify for
    /// static initialization instead.
    fn bind_write(&mut self, name: &str) -> Result<(), CompileError> {
        self.bind_write_with_flags(name, GlobalFlags::MUTABLE)
    }

    /// Like `bind_write`, but lets the caller pick the `GlobalFlags` a
    /// module-scope write declares its global with. Ignored outside module
    /// scope, where a write always targets a local or a class attribute.
    fn bind_write_with_flags(&mut self, name: &str, module_flags: GlobalFlags) -> Result<(), CompileError> {
        self.tracer.on_name_bound(&self.module_name, name);
        match *self.current_scope() {
            Scope::Function(fid) => {
                let explicit_global = self
                    .global
                    .function(fid)
                    .is_some_and(|f| f.explicit_globals.contains(name));
                if explicit_global {
                    self.module_mut().declare_global(name, GlobalFlags::MUTABLE);
                } else if let Some(func) = self.global.function_mut(fid) {
                    if func.local(name).is_none() {
                        func.set_local(name, Value::indeterminate());
                    }
                }
            }
            Scope::Class(cid) => {
                if let Some(class) = self.global.class_mut(cid) {
                    if class.has_own_attribute(name) {
                        return Err(CompileError::new(
                            CompileErrorKind::Annotation,
                            format!("duplicate attribute '{name}' in class body"),
                        ));
                    }
                    class.push_attribute(name.to_owned(), Value::indeterminate());
                }
            }
            Scope::Module => {
                if self.is_builtin_name(name) {
                    return Err(CompileError::new(
                        CompileErrorKind::Annotation,
                        format!("cannot reassign builtin name '{name}'"),
                    ));
                }
                self.module_mut().declare_global(name, module_flags);
            }
        }
        Ok(())
    }

    /// Whether `name` already names one of the reserved builtin exception or
    /// container classes every module sees without an import (`spec.md` §4.2
    /// "Writes to names already bound in the builtins module are
    /// rejected").
    fn is_builtin_name(&self, name: &str) -> bool {
        self.global.classes.values().any(|c| c.id.is_builtin() && c.name == name)
    }

    /// Whether `kind` is a literal the phase driver can materialize directly
    /// into a global's cell (`phase.rs::materialize`), making the write it
    /// backs a candidate for `GlobalFlags::STATIC_INITIALIZE`.
    fn is_static_literal(kind: &ExprKind) -> bool {
        matches!(
            kind,
            ExprKind::None
                | ExprKind::True
                | ExprKind::False
                | ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Bytes(_)
                | ExprKind::Unicode(_)
                | ExprKind::List(_)
                | ExprKind::Tuple(_)
                | ExprKind::Set(_)
                | ExprKind::Dict(_)
        )
    }

    /// `self.X = ...` inside `__init__`: creates/updates a class attribute
    /// rather than a local, and tolerates repeated writes.
    fn bind_self_attribute(&mut self, class_id: ClassId, name: &str) {
        if let Some(class) = self.global.class_mut(class_id) {
            if !class.has_own_attribute(name) {
                class.push_attribute(name.to_owned(), Value::indeterminate());
            }
        }
    }

    fn visit_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expression(e) => self.visit_expr(e)?,
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value)?;
                let is_static_module_literal = matches!(self.current_scope(), Scope::Module) && Self::is_static_literal(&value.kind);
                for t in targets {
                    if is_static_module_literal
                        && let ExprKind::VariableLookup(name) = &t.kind
                    {
                        self.bind_write_with_flags(name, GlobalFlags::STATIC_INITIALIZE)?;
                    } else {
                        self.visit_assign_target(t)?;
                    }
                }
            }
            StmtKind::Augment { target, value, .. } => {
                self.visit_expr(value)?;
                self.visit_assign_target(target)?;
            }
            StmtKind::Delete(exprs) => {
                for e in exprs {
                    self.visit_expr(e)?;
                }
            }
            StmtKind::Import { alias, module } => {
                let bound = alias.clone().unwrap_or_else(|| module.split('.').next().unwrap_or(module).to_owned());
                self.bind_write(&bound)?;
            }
            StmtKind::ImportFrom { names, .. } => {
                for (name, alias) in names {
                    self.bind_write(alias.as_deref().unwrap_or(name))?;
                }
            }
            StmtKind::ImportStar { module } => {
                if !matches!(self.current_scope(), Scope::Module) {
                    return Err(CompileError::at(
                        CompileErrorKind::Analysis,
                        "import * is only allowed at module scope",
                        stmt.offset,
                    ));
                }
                self.global.get_or_create_module(module, String::new());
                let source_globals: Vec<String> = self
                    .global
                    .modules
                    .get(module)
                    .map(|m| m.globals.keys().cloned().collect())
                    .unwrap_or_default();
                for name in source_globals {
                    self.bind_write(&name)?;
                }
            }
            StmtKind::Global(names) => {
                if matches!(self.current_scope(), Scope::Module) {
                    return Err(CompileError::at(CompileErrorKind::Annotation, "global statement outside a function", stmt.offset));
                }
                if let Scope::Function(fid) = *self.current_scope() {
                    if let Some(func) = self.global.function_mut(fid) {
                        for name in names {
                            if func.local(name).is_some() {
                                return Err(CompileError::at(
                                    CompileErrorKind::Annotation,
                                    format!("'global {name}' follows a local write of '{name}'"),
                                    stmt.offset,
                                ));
                            }
                            func.explicit_globals.insert(name.clone());
                        }
                    }
                }
            }
            StmtKind::Exec(e) => self.visit_expr(e)?,
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test)?;
                if let Some(m) = msg {
                    self.visit_expr(m)?;
                }
            }
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.visit_expr(e)?;
                }
            }
            StmtKind::Raise(e) => {
                if let Some(e) = e {
                    self.visit_expr(e)?;
                }
            }
            StmtKind::Yield(e) => {
                if matches!(self.current_scope(), Scope::Module) {
                    return Err(CompileError::at(CompileErrorKind::Annotation, "yield outside a function", stmt.offset));
                }
                self.visit_expr(e)?;
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    self.visit_expr(cond)?;
                    self.visit_block(body)?;
                }
                self.visit_block(orelse)?;
            }
            StmtKind::For { target, iter, body, orelse } => {
                self.visit_expr(iter)?;
                self.visit_assign_target(target)?;
                self.visit_block(body)?;
                self.visit_block(orelse)?;
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_block(body)?;
                self.visit_block(orelse)?;
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                self.visit_block(body)?;
                for h in handlers {
                    self.visit_except_handler(h)?;
                }
                self.visit_block(orelse)?;
                self.visit_block(finalbody)?;
            }
            StmtKind::With { context, binding, body } => {
                self.visit_expr(context)?;
                if let Some(b) = binding {
                    self.visit_assign_target(b)?;
                }
                self.visit_block(body)?;
            }
            StmtKind::FunctionDef(def) => self.visit_function_def(def, stmt.offset)?,
            StmtKind::ClassDef(def) => {
                let class_id = self.global.allocate_class_id(false);
                if matches!(self.current_scope(), Scope::Module) {
                    self.bind_write_with_flags(&def.name, GlobalFlags::STATIC_INITIALIZE)?;
                } else {
                    self.bind_write(&def.name)?;
                }
                {
                    let ctx = ClassContext::new(class_id, Some(self.module_name.clone()), def.name.clone());
                    self.global.classes.insert(class_id, ctx);
                }
                if let Some(parent_name) = &def.parent {
                    let parent_id = self
                        .global
                        .classes
                        .iter()
                        .find(|(_, c)| &c.name == parent_name)
                        .map(|(id, _)| *id);
                    if let Some(parent_id) = parent_id {
                        let parent = self.global.classes.get(&parent_id).expect("looked up by id").attributes.clone();
                        if let Some(child) = self.global.class_mut(class_id) {
                            child.parent_class_id = Some(parent_id);
                            for attr in parent {
                                child.push_attribute(attr.name, attr.value);
                            }
                        }
                    }
                }
                self.scopes.push(Scope::Class(class_id));
                self.visit_block(&def.body)?;
                self.scopes.pop();
                if let Some(class) = self.global.class_mut(class_id) {
                    class.ast_root = Some(def.clone());
                }
            }
        }
        Ok(())
    }

    fn visit_except_handler(&mut self, handler: &ExceptHandler) -> Result<(), CompileError> {
        if let Some(ty) = &handler.exc_type {
            self.visit_expr(ty)?;
        }
        if let Some(binding) = &handler.binding {
            self.bind_write(binding)?;
        }
        self.visit_block(&handler.body)
    }

    fn visit_function_def(&mut self, def: &FunctionDef, offset: usize) -> Result<(), CompileError> {
        let is_init = def.name == "__init__" && matches!(self.current_scope(), Scope::Class(_));
        let function_id = if is_init {
            let Scope::Class(class_id) = *self.current_scope() else { unreachable!() };
            class_id.as_function_id()
        } else {
            self.global.allocate_function_id(false)
        };

        if !def.is_lambda {
            if matches!(self.current_scope(), Scope::Module) {
                self.bind_write_with_flags(&def.name, GlobalFlags::STATIC_INITIALIZE)?;
            } else {
                self.bind_write(&def.name)?;
            }
        }

        let class_id = match *self.current_scope() {
            Scope::Class(cid) => Some(cid),
            _ => None,
        };
        self.global.functions.insert(
            function_id,
            FunctionContext::new(function_id, Some(self.module_name.clone()), class_id, def.name.clone()),
        );

        self.scopes.push(Scope::Function(function_id));
        self.next_split_id.push(0);

        for param in &def.params {
            self.visit_param(function_id, param, offset)?;
        }
        if let Some(name) = &def.varargs {
            self.bind_write(name)?;
        }
        if let Some(name) = &def.varkwargs {
            self.bind_write(name)?;
        }

        if let Some(func) = self.global.function_mut(function_id) {
            func.ast_root = Some(def.clone());
            func.varargs_name = def.varargs.clone();
            func.varkwargs_name = def.varkwargs.clone();
        }

        self.visit_block(&def.body)?;

        self.next_split_id.pop();
        self.scopes.pop();
        Ok(())
    }

    fn visit_param(&mut self, function_id: FunctionId, param: &Param, offset: usize) -> Result<(), CompileError> {
        if let Some(default) = &param.default {
            self.visit_expr(default)?;
        }
        if let Some(func) = self.global.function_mut(function_id) {
            func.args.push(crate::context::function::Argument {
                name: param.name.clone(),
                default: None,
                type_annotation: None,
            });
            func.set_local(&param.name, Value::indeterminate());
        }
        let _ = offset;
        Ok(())
    }

    fn visit_assign_target(&mut self, target: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::VariableLookup(name) => self.bind_write(name),
            ExprKind::AttributeLookup { base, attr } => {
                if let ExprKind::VariableLookup(base_name) = &base.kind
                    && base_name == "self"
                    && let Scope::Function(fid) = *self.current_scope()
                    && let Some(func) = self.global.function(fid)
                    && func.is_class_init()
                    && let Some(class_id) = func.class_id
                {
                    self.bind_self_attribute(class_id, attr);
                    return Ok(());
                }
                self.visit_expr(base)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.visit_assign_target(item)?;
                }
                Ok(())
            }
            _ => self.visit_expr(target),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::None | ExprKind::True | ExprKind::False | ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bytes(_) | ExprKind::Unicode(_) | ExprKind::VariableLookup(_) => {}
            ExprKind::AttributeLookup { base, .. } => self.visit_expr(base)?,
            ExprKind::ArrayIndex { base, index } => {
                self.visit_expr(base)?;
                self.visit_expr(index)?;
            }
            ExprKind::ArraySlice { base, start, stop, step } => {
                self.visit_expr(base)?;
                for e in [start, stop, step].into_iter().flatten() {
                    self.visit_expr(e)?;
                }
            }
            ExprKind::Unary { operand, .. } => self.visit_expr(operand)?,
            ExprKind::Binary { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
            }
            ExprKind::Ternary { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_expr(body)?;
                self.visit_expr(orelse)?;
            }
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    self.visit_expr(item)?;
                }
            }
            ExprKind::Dict(items) => {
                for (k, v) in items {
                    self.visit_expr(k)?;
                    self.visit_expr(v)?;
                }
            }
            ExprKind::Comprehension { element, target, iter, .. } => {
                self.visit_expr(iter)?;
                self.visit_assign_target(target)?;
                self.visit_expr(element)?;
            }
            ExprKind::Lambda(def) => self.visit_function_def(def, expr.offset)?,
            ExprKind::FunctionCall { callee, args, split_id, .. } => {
                self.visit_expr(callee)?;
                for a in args {
                    self.visit_expr(a)?;
                }
                split_id.set(Some(self.alloc_split_id()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{BinOp, ComprehensionKind, Module as AstModule},
        context::module::ModuleContext,
    };

    fn setup(body: Vec<Stmt>) -> (GlobalContext, String) {
        let mut global = GlobalContext::new(vec![]);
        let name = "m".to_owned();
        let mut module = ModuleContext::new_source(name.clone(), String::new());
        module.ast_root = Some(AstModule { body });
        global.modules.insert(name.clone(), module);
        (global, name)
    }

    #[test]
    fn assignment_creates_a_module_global() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::Assign {
                targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                value: Expr::new(0, ExprKind::Int(1)),
            },
        )]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("x").is_some());
    }

    #[test]
    fn function_call_receives_a_split_id() {
        let call = Expr::call(0, Expr::new(0, ExprKind::VariableLookup("f".into())), vec![]);
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Expression(call.clone()))]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        let ExprKind::FunctionCall { split_id, .. } = &call.kind else { unreachable!() };
        assert_eq!(split_id.get(), Some(0));
    }

    #[test]
    fn yield_outside_function_is_rejected() {
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Yield(Expr::new(0, ExprKind::Int(1))))]);
        let err = annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Annotation);
    }

    #[test]
    fn global_statement_outside_function_is_rejected() {
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Global(vec!["x".into()]))]);
        let err = annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Annotation);
    }

    #[test]
    fn augmented_assignment_still_binds_target() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::Augment {
                target: Box::new(Expr::new(0, ExprKind::VariableLookup("x".into()))),
                op: BinOp::Add,
                value: Expr::new(0, ExprKind::Int(1)),
            },
        )]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("x").is_some());
    }

    #[test]
    fn for_loop_binds_its_target() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::For {
                target: Box::new(Expr::new(0, ExprKind::VariableLookup("item".into()))),
                iter: Expr::new(0, ExprKind::VariableLookup("items".into())),
                body: vec![],
                orelse: vec![],
            },
        )]);
        global.modules.get_mut(&name).unwrap().declare_global("items", crate::context::module::GlobalFlags::MUTABLE);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("item").is_some());
    }

    #[test]
    fn try_except_binds_the_exception_name() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::Try {
                body: vec![],
                handlers: vec![ExceptHandler {
                    exc_type: Some(Expr::new(0, ExprKind::VariableLookup("ValueError".into()))),
                    binding: Some("err".into()),
                    body: vec![],
                }],
                orelse: vec![],
                finalbody: vec![],
            },
        )]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("err").is_some());
    }

    #[test]
    fn with_statement_binds_its_binding() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::With {
                context: Expr::new(0, ExprKind::VariableLookup("resource".into())),
                binding: Some(Box::new(Expr::new(0, ExprKind::VariableLookup("handle".into())))),
                body: vec![],
            },
        )]);
        global.modules.get_mut(&name).unwrap().declare_global("resource", crate::context::module::GlobalFlags::MUTABLE);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("handle").is_some());
    }

    #[test]
    fn import_binds_the_module_name() {
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Import { module: "os".into(), alias: None })]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("os").is_some());
    }

    #[test]
    fn import_from_binds_each_imported_name() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::ImportFrom {
                module: "os.path".into(),
                names: vec![("join".into(), None), ("exists".into(), Some("path_exists".into()))],
            },
        )]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        let module = global.modules.get(&name).unwrap();
        assert!(module.global("join").is_some());
        assert!(module.global("path_exists").is_some());
    }

    #[test]
    fn lambda_allocates_a_function_without_binding_a_name() {
        let lambda = Expr::new(
            0,
            ExprKind::Lambda(Box::new(FunctionDef {
                name: "<lambda>".into(),
                params: vec![],
                varargs: None,
                varkwargs: None,
                return_annotation: None,
                body: vec![],
                is_lambda: true,
            })),
        );
        let functions_before = 0;
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Expression(lambda))]);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.functions.len() > functions_before);
        assert!(global.modules.get(&name).unwrap().global("<lambda>").is_none());
    }

    #[test]
    fn comprehension_binds_its_loop_target() {
        let comp = Expr::new(
            0,
            ExprKind::Comprehension {
                kind: ComprehensionKind::List,
                element: Box::new(Expr::new(0, ExprKind::VariableLookup("x".into()))),
                target: Box::new(Expr::new(0, ExprKind::VariableLookup("x".into()))),
                iter: Box::new(Expr::new(0, ExprKind::VariableLookup("source".into()))),
            },
        );
        let (mut global, name) = setup(vec![Stmt::new(0, StmtKind::Expression(comp))]);
        global.modules.get_mut(&name).unwrap().declare_global("source", crate::context::module::GlobalFlags::MUTABLE);
        annotate_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        assert!(global.modules.get(&name).unwrap().global("x").is_some());
    }
}
