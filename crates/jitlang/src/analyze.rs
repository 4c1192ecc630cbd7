//! Analysis visitor (`spec.md` §4.3, component C5).
//!
//! Second pre-order walk. Children are visited first so parents see child
//! values; the visitor threads a single "current value" for the expression
//! subtree it just finished. Responsible for type inference, constant
//! folding, call/attribute annotation, and the monotonic-type rule on
//! assignment.

use crate::{
    ast::{BinOp, Expr, ExprKind, FunctionDef, Stmt, StmtKind, UnaryOp},
    context::{function::Argument, global::GlobalContext, module::Phase},
    error::{CompileError, CompileErrorKind},
    ids::ClassId,
    tracer::JitTracer,
    value::{Kind, Known, Value},
};

enum Scope {
    Module,
    Function(crate::ids::FunctionId),
    Class(ClassId),
}

struct Analyzer<'a, Tr: JitTracer> {
    global: &'a mut GlobalContext,
    module_name: String,
    scopes: Vec<Scope>,
    /// Set when the immediately preceding attribute lookup's base evaluated
    /// to a `Class` value; consumed by the next `FunctionCall` to recognise
    /// classmethod dispatch (`spec.md` §4.3).
    last_attribute_lookup_had_class_base: bool,
    tracer: &'a Tr,
}

pub fn analyze_module<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, tracer: &Tr) -> Result<(), CompileError> {
    let body = {
        let module = global.modules.get(module_name).expect("module must exist before analysis");
        module.ast_root.clone().expect("annotation must have installed an AST")
    };

    let mut az = Analyzer {
        global,
        module_name: module_name.to_owned(),
        scopes: vec![Scope::Module],
        last_attribute_lookup_had_class_base: false,
        tracer,
    };
    az.visit_block(&body.body)?;
    Ok(())
}

impl<Tr: JitTracer> Analyzer<'_, Tr> {
    fn current_scope(&self) -> &Scope {
        self.scopes.last().expect("scope stack is never empty")
    }

    /// `record_assignment_generic` (`spec.md` §4.3): first write replaces
    /// `Indeterminate`; later writes must keep the same type; a differing
    /// known value demotes the slot to type-only rather than erroring.
    fn record_assignment_generic(existing: &Value, incoming: Value, offset: usize) -> Result<Value, CompileError> {
        if existing.is_indeterminate() {
            return Ok(incoming);
        }
        if !existing.types_equal(&incoming) {
            return Err(CompileError::at(
                CompileErrorKind::Analysis,
                format!("cannot change type of existing binding from {:?} to {:?}", existing.kind(), incoming.kind()),
                offset,
            ));
        }
        if existing.known() == incoming.known() {
            Ok(incoming)
        } else {
            Ok(incoming.clear_value())
        }
    }

    fn record_assignment(&mut self, name: &str, value: Value, offset: usize) -> Result<(), CompileError> {
        self.tracer.on_type_decided(&format!("{}::{name}", self.module_name));
        match *self.current_scope() {
            Scope::Function(fid) => {
                let is_global = self.global.function(fid).is_some_and(|f| f.explicit_globals.contains(name));
                if is_global {
                    self.record_module_global(name, value, offset)
                } else {
                    let existing = self.global.function(fid).and_then(|f| f.local(name).cloned()).unwrap_or_else(Value::indeterminate);
                    let resolved = Self::record_assignment_generic(&existing, value, offset)?;
                    if let Some(func) = self.global.function_mut(fid) {
                        func.set_local(name, resolved);
                    }
                    Ok(())
                }
            }
            Scope::Class(cid) => {
                let existing = self
                    .global
                    .class(cid)
                    .and_then(|c| c.attribute(name))
                    .map(|a| a.value.clone())
                    .unwrap_or_else(Value::indeterminate);
                let resolved = Self::record_assignment_generic(&existing, value, offset)?;
                if let Some(class) = self.global.class_mut(cid) {
                    class.push_attribute(name.to_owned(), resolved);
                }
                Ok(())
            }
            Scope::Module => self.record_module_global(name, value, offset),
        }
    }

    fn record_module_global(&mut self, name: &str, value: Value, offset: usize) -> Result<(), CompileError> {
        let module = self.global.modules.get(&self.module_name).expect("module exists");
        let existing = module.global(name).map(|g| g.value.clone()).unwrap_or_else(Value::indeterminate);
        let resolved = Self::record_assignment_generic(&existing, value, offset)?;
        let module = self.global.modules.get_mut(&self.module_name).expect("module exists");
        module.set_global_value(name, resolved);
        Ok(())
    }

    fn sentinel_class_for(&self, kind: &Kind) -> Option<ClassId> {
        let s = &self.global.sentinel_classes;
        match kind {
            Kind::Bytes => Some(s.bytes),
            Kind::Unicode => Some(s.unicode),
            Kind::List(_) => Some(s.list),
            Kind::Tuple(_) => Some(s.tuple),
            Kind::Set(_) => Some(s.set),
            Kind::Dict(..) => Some(s.dict),
            _ => None,
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
            StmtKind::Expression(e) => {
                self.visit_expr(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let v = self.visit_expr(value)?;
                for t in targets {
                    self.assign_to_target(t, v.clone())?;
                }
            }
            StmtKind::Augment { target, op, value } => {
                let lhs = self.visit_expr(target)?;
                let rhs = self.visit_expr(value)?;
                let result = Self::apply_binop(*op, &lhs, &rhs).unwrap_or_else(|| Value::of_kind(lhs.kind().clone()));
                self.assign_to_target(target, result)?;
            }
            StmtKind::Delete(exprs) => {
                for e in exprs {
                    self.visit_expr(e)?;
                }
            }
            StmtKind::Import { .. } | StmtKind::ImportFrom { .. } | StmtKind::ImportStar { .. } => {
                self.visit_import(stmt)?;
            }
            StmtKind::Global(_) | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Exec(e) => {
                self.visit_expr(e)?;
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test)?;
                if let Some(m) = msg {
                    self.visit_expr(m)?;
                }
            }
            StmtKind::Return(e) => {
                let value = match e {
                    Some(e) => self.visit_expr(e)?,
                    None => Value::none(),
                };
                if let Scope::Function(fid) = *self.current_scope()
                    && let Some(func) = self.global.function_mut(fid)
                {
                    func.return_types.push(value);
                }
            }
            StmtKind::Raise(e) => {
                if let Some(e) = e {
                    self.visit_expr(e)?;
                }
            }
            StmtKind::Yield(e) => {
                self.visit_expr(e)?;
            }
            StmtKind::If { branches, orelse } => {
                let mut any_true_reached = false;
                for (cond, body) in branches {
                    let cond_val = self.visit_expr(cond)?;
                    match cond_val.truth_value() {
                        Some(false) => continue,
                        Some(true) => {
                            self.visit_block(body)?;
                            any_true_reached = true;
                            break;
                        }
                        None => self.visit_block(body)?,
                    }
                }
                if !any_true_reached {
                    self.visit_block(orelse)?;
                }
            }
            StmtKind::For { target, iter, body, orelse } => {
                let iter_val = self.visit_expr(iter)?;
                let elem_ty = self.element_type_for_iteration(&iter_val, stmt.offset)?;
                self.assign_to_target(target, elem_ty)?;
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
                    if let Some(ty) = &h.exc_type {
                        self.visit_expr(ty)?;
                    }
                    if let Some(binding) = &h.binding {
                        self.record_assignment(binding, Value::indeterminate(), stmt.offset)?;
                    }
                    self.visit_block(&h.body)?;
                }
                self.visit_block(orelse)?;
                self.visit_block(finalbody)?;
            }
            StmtKind::With { context, binding, body } => {
                self.visit_expr(context)?;
                if let Some(b) = binding {
                    self.assign_to_target(b, Value::indeterminate())?;
                }
                self.visit_block(body)?;
            }
            StmtKind::FunctionDef(def) => self.visit_function_def(def, stmt.offset)?,
            StmtKind::ClassDef(def) => {
                self.scopes.push(Scope::Class(self.class_id_for_name(&def.name)));
                self.visit_block(&def.body)?;
                self.scopes.pop();
            }
        }
        Ok(())
    }

    fn class_id_for_name(&self, name: &str) -> ClassId {
        self.global
            .classes
            .iter()
            .find(|(_, c)| c.name == name && c.module.as_deref() == Some(self.module_name.as_str()))
            .map(|(id, _)| *id)
            .expect("annotation visitor must have registered this class")
    }

    fn element_type_for_iteration(&self, container: &Value, offset: usize) -> Result<Value, CompileError> {
        let elem = match container.kind() {
            Kind::List(e) | Kind::Tuple(e) | Kind::Set(e) => (**e).clone(),
            Kind::Dict(k, _) => (**k).clone(),
            Kind::Bytes | Kind::Unicode => Value::int_type(),
            Kind::Indeterminate => Value::indeterminate(),
            Kind::None | Kind::Bool | Kind::Int | Kind::Float | Kind::Function(_) | Kind::Class(_) | Kind::Instance(_) | Kind::Module(_) => {
                return Err(CompileError::at(CompileErrorKind::Analysis, "value is not iterable", offset));
            }
            Kind::ExtensionTypeReference(_) => Value::indeterminate(),
        };
        Ok(elem.clear_value())
    }

    fn assign_to_target(&mut self, target: &Expr, value: Value) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::VariableLookup(name) => self.record_assignment(name, value, target.offset),
            ExprKind::AttributeLookup { base, attr } => {
                self.visit_expr(base)?;
                if let ExprKind::VariableLookup(base_name) = &base.kind
                    && base_name == "self"
                    && let Scope::Function(fid) = *self.current_scope()
                    && let Some(func) = self.global.function(fid)
                    && func.is_class_init()
                    && let Some(class_id) = func.class_id
                {
                    let existing = self
                        .global
                        .class(class_id)
                        .and_then(|c| c.attribute(attr))
                        .map(|a| a.value.clone())
                        .unwrap_or_else(Value::indeterminate);
                    let resolved = Self::record_assignment_generic(&existing, value, target.offset)?;
                    if let Some(class) = self.global.class_mut(class_id) {
                        class.push_attribute(attr.clone(), resolved);
                    }
                }
                Ok(())
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.assign_to_target(item, Value::indeterminate())?;
                }
                Ok(())
            }
            _ => {
                self.visit_expr(target)?;
                Ok(())
            }
        }
    }

    fn visit_import(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Import { module, alias } => {
                self.global.get_or_create_module(module, String::new());
                let bound = alias.clone().unwrap_or_else(|| module.clone());
                self.record_assignment(&bound, Value::module_known(module.clone()), stmt.offset)
            }
            StmtKind::ImportFrom { module, names } => {
                crate::phase::advance_module(self.global, module, Phase::Analyzed, self.tracer)?;
                for (name, alias) in names {
                    let value = self
                        .global
                        .modules
                        .get(module)
                        .and_then(|m| m.global(name))
                        .map(|g| g.value.clone())
                        .unwrap_or_else(Value::indeterminate);
                    self.record_assignment(alias.as_deref().unwrap_or(name), value, stmt.offset)?;
                }
                Ok(())
            }
            StmtKind::ImportStar { module } => {
                if !matches!(self.current_scope(), Scope::Module) {
                    return Err(CompileError::at(CompileErrorKind::Analysis, "import * is only allowed at module scope", stmt.offset));
                }
                crate::phase::advance_module(self.global, module, Phase::Analyzed, self.tracer)?;
                let entries: Vec<(String, Value)> = self
                    .global
                    .modules
                    .get(module)
                    .map(|m| m.globals.iter().map(|(n, g)| (n.clone(), g.value.clone())).collect())
                    .unwrap_or_default();
                for (name, value) in entries {
                    self.record_assignment(&name, value, stmt.offset)?;
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn visit_function_def(&mut self, def: &FunctionDef, offset: usize) -> Result<(), CompileError> {
        let function_id = self.function_id_for_def(def);
        if !def.is_lambda {
            self.record_assignment(&def.name, Value::function_known(function_id), offset)?;
        }

        let class_id = match *self.current_scope() {
            Scope::Class(cid) => Some(cid),
            _ => None,
        };
        let is_init = self.global.function(function_id).is_some_and(super::context::function::FunctionContext::is_class_init);

        let mut arg_values = Vec::with_capacity(def.params.len());
        let mut local_bindings = Vec::with_capacity(def.params.len());
        for (i, param) in def.params.iter().enumerate() {
            let value = if i == 0 && class_id.is_some() && !Self::is_staticmethod_like(def) {
                Value::instance_type(class_id.expect("checked above"))
            } else if let Some(default) = &param.default {
                self.visit_expr(default)?
            } else if let Some(annotation) = &param.type_annotation {
                self.type_for_annotation(annotation)
            } else {
                Value::indeterminate()
            };
            let type_annotation = param.type_annotation.as_ref().map(|a| self.type_for_annotation(a));
            arg_values.push(Argument {
                name: param.name.clone(),
                default: param.default.as_ref().map(|_| value.clone()),
                type_annotation,
            });
            local_bindings.push((param.name.clone(), value));
        }

        self.scopes.push(Scope::Function(function_id));
        if let Some(func) = self.global.function_mut(function_id) {
            func.args = arg_values.clone();
            for (name, value) in local_bindings {
                func.set_local(&name, value);
            }
        }

        self.visit_block(&def.body)?;

        if is_init {
            if let Some(func) = self.global.function_mut(function_id) {
                func.annotated_return_type = Some(Value::instance_type(class_id.expect("init implies class")));
            }
        } else {
            if let Some(annotation) = &def.return_annotation {
                let expected = self.type_for_annotation(annotation);
                if let Some(func) = self.global.function(function_id) {
                    for actual in &func.return_types {
                        if !actual.is_indeterminate() && crate::dispatch::match_value_to_type(&expected, actual, &self.global.classes) < 0 {
                            return Err(CompileError::at(
                                CompileErrorKind::Analysis,
                                format!("returned {:?} does not match the annotated return type {:?}", actual.kind(), expected.kind()),
                                offset,
                            ));
                        }
                    }
                }
                if let Some(func) = self.global.function_mut(function_id) {
                    func.annotated_return_type = Some(expected);
                }
            }
            if let Some(func) = self.global.function(function_id)
                && func.return_types.is_empty()
                && let Some(func) = self.global.function_mut(function_id)
            {
                func.return_types.push(Value::none());
            }
        }

        self.scopes.pop();
        Ok(())
    }

    /// `type_for_annotation` (`SPEC_FULL.md` §4.3 "Parameter typing"):
    /// resolves a parsed `TypeAnnotation` to a type-only `Value`. Container
    /// annotations resolve their generic arguments recursively; an
    /// annotation naming a class not visible in the current module, or any
    /// other name this pipeline doesn't recognize as a builtin type,
    /// resolves to `Indeterminate` rather than erroring.
    fn type_for_annotation(&self, annotation: &crate::ast::TypeAnnotation) -> Value {
        match annotation.name.as_str() {
            "None" => Value::none(),
            "bool" => Value::bool_type(),
            "int" => Value::int_type(),
            "float" => Value::float_type(),
            "bytes" => Value::bytes_type(),
            "str" => Value::unicode_type(),
            "list" => Value::list_type(self.generic_argument_type(annotation, 0)),
            "tuple" => Value::tuple_type(self.generic_argument_type(annotation, 0)),
            "set" => Value::set_type(self.generic_argument_type(annotation, 0)),
            "dict" => Value::dict_type(self.generic_argument_type(annotation, 0), self.generic_argument_type(annotation, 1)),
            name => self
                .global
                .classes
                .iter()
                .find(|(_, c)| c.name == name && c.module.as_deref() == Some(self.module_name.as_str()))
                .map(|(id, _)| Value::instance_type(*id))
                .unwrap_or_else(Value::indeterminate),
        }
    }

    fn generic_argument_type(&self, annotation: &crate::ast::TypeAnnotation, index: usize) -> Value {
        annotation.generic_arguments.get(index).map_or_else(Value::indeterminate, |a| self.type_for_annotation(a))
    }

    fn is_staticmethod_like(_def: &FunctionDef) -> bool {
        false
    }

    fn function_id_for_def(&self, def: &FunctionDef) -> crate::ids::FunctionId {
        if def.name == "__init__"
            && let Scope::Class(cid) = *self.current_scope()
        {
            return cid.as_function_id();
        }
        self.global
            .functions
            .iter()
            .find(|(_, f)| f.name == def.name && f.ast_root.as_ref() == Some(def))
            .map(|(id, _)| *id)
            .expect("annotation visitor registered this function")
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        let value = match &expr.kind {
            ExprKind::None => Value::none(),
            ExprKind::True => Value::bool_known(true),
            ExprKind::False => Value::bool_known(false),
            ExprKind::Int(v) => Value::int_known(*v),
            ExprKind::Float(v) => Value::float_known(*v),
            ExprKind::Bytes(b) => Value::bytes_known(b.clone()),
            ExprKind::Unicode(s) => Value::unicode_known(s.clone()),
            ExprKind::VariableLookup(name) => self.lookup_variable(name),
            ExprKind::AttributeLookup { base, attr } => {
                let base_val = self.visit_expr(base)?;
                self.resolve_attribute(&base_val, attr, expr.offset)?
            }
            ExprKind::ArrayIndex { base, index } => {
                let base_val = self.visit_expr(base)?;
                let index_val = self.visit_expr(index)?;
                self.index_container(&base_val, &index_val, expr.offset)?
            }
            ExprKind::ArraySlice { base, start, stop, step } => {
                self.visit_expr(base)?;
                for e in [start, stop, step].into_iter().flatten() {
                    self.visit_expr(e)?;
                }
                Value::indeterminate()
            }
            ExprKind::Unary { op, operand } => {
                let v = self.visit_expr(operand)?;
                Self::apply_unop(*op, &v)
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.visit_expr(left)?;
                let r = self.visit_expr(right)?;
                Self::apply_binop(*op, &l, &r).unwrap_or_else(Value::indeterminate)
            }
            ExprKind::Ternary { test, body, orelse } => {
                self.visit_expr(test)?;
                let b = self.visit_expr(body)?;
                let o = self.visit_expr(orelse)?;
                if b.types_equal(&o) { b.clear_value() } else { Value::indeterminate() }
            }
            ExprKind::List(items) => Value::list_known(self.visit_all(items)?),
            ExprKind::Tuple(items) => Value::tuple_known(self.visit_all(items)?),
            ExprKind::Set(items) => Value::set_known(self.visit_all(items)?),
            ExprKind::Dict(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (k, v) in items {
                    out.push((self.visit_expr(k)?, self.visit_expr(v)?));
                }
                Value::dict_known(out)
            }
            ExprKind::Comprehension { element, target, iter, .. } => {
                let iter_val = self.visit_expr(iter)?;
                let elem_ty = self.element_type_for_iteration(&iter_val, expr.offset)?;
                self.assign_to_target(target, elem_ty)?;
                self.visit_expr(element)?;
                Value::indeterminate()
            }
            ExprKind::Lambda(def) => {
                self.visit_function_def(def, expr.offset)?;
                Value::function_known(self.function_id_for_def(def))
            }
            ExprKind::FunctionCall { callee, args, callee_function_id, arg_types, .. } => {
                self.last_attribute_lookup_had_class_base = false;
                let callee_val = self.visit_expr(callee)?;
                let is_classmethod_dispatch = self.last_attribute_lookup_had_class_base && matches!(callee_val.kind(), Kind::Function(_));
                let is_construction = matches!(callee_val.kind(), Kind::Class(_));
                let mut collected_arg_types = Vec::with_capacity(args.len());
                for a in args {
                    collected_arg_types.push(self.visit_expr(a)?);
                }
                arg_types.replace(Some(collected_arg_types));
                if is_construction {
                    self.tracer.on_type_decided("construction-call");
                } else if is_classmethod_dispatch {
                    self.tracer.on_type_decided("classmethod-dispatch-call");
                }
                if let Kind::Function(fid) = callee_val.kind() {
                    callee_function_id.set(Some(fid.raw()));
                    self.call_result_type(*fid)
                } else if let Kind::Class(class_id) = callee_val.kind() {
                    // Constructor id equals class id, so the compile visitor
                    // can read the callee to invoke straight off this cell
                    // the same way it does for a plain function call.
                    callee_function_id.set(Some(class_id.as_function_id().raw()));
                    Value::instance_type(*class_id)
                } else {
                    Value::indeterminate()
                }
            }
        };
        Ok(value)
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, CompileError> {
        exprs.iter().map(|e| self.visit_expr(e)).collect()
    }

    fn call_result_type(&self, function_id: crate::ids::FunctionId) -> Value {
        let Some(func) = self.global.function(function_id) else {
            return Value::indeterminate();
        };
        let analyzed = func
            .module
            .as_ref()
            .and_then(|m| self.global.modules.get(m))
            .is_some_and(|m| m.phase >= Phase::Analyzed)
            || func.module.as_deref() == Some(self.module_name.as_str())
            || func.is_builtin();
        if !analyzed {
            return Value::indeterminate();
        }
        match func.return_types.len() {
            0 => Value::none(),
            1 => func.return_types[0].clone(),
            _ => Value::indeterminate(),
        }
    }

    fn lookup_variable(&mut self, name: &str) -> Value {
        match *self.current_scope() {
            Scope::Function(fid) => {
                if let Some(v) = self.global.function(fid).and_then(|f| f.local(name).cloned()) {
                    return v;
                }
            }
            Scope::Class(cid) => {
                if let Some(v) = self.global.class(cid).and_then(|c| c.attribute(name)).map(|a| a.value.clone()) {
                    return v;
                }
            }
            Scope::Module => {}
        }
        self.global
            .modules
            .get(&self.module_name)
            .and_then(|m| m.global(name))
            .map(|g| g.value.clone())
            .unwrap_or_else(Value::indeterminate)
    }

    fn resolve_attribute(&mut self, base: &Value, attr: &str, offset: usize) -> Result<Value, CompileError> {
        self.last_attribute_lookup_had_class_base = matches!(base.kind(), Kind::Class(_));
        match base.kind() {
            Kind::Instance(class_id) => {
                if let Some(Known::Instance(attrs)) = base.known()
                    && let Some((_, v)) = attrs.iter().find(|(n, _)| n == attr)
                {
                    return Ok(v.clone());
                }
                Ok(self.class_attribute_value(*class_id, attr))
            }
            Kind::Class(class_id) => Ok(self.class_attribute_value(*class_id, attr)),
            Kind::Module(name) => Ok(self
                .global
                .modules
                .get(name)
                .and_then(|m| m.global(attr))
                .map(|g| g.value.clone())
                .unwrap_or_else(Value::indeterminate)),
            other => {
                if let Some(class_id) = self.sentinel_class_for(other) {
                    Ok(self.class_attribute_value(class_id, attr))
                } else {
                    Err(CompileError::at(CompileErrorKind::Analysis, format!("'{attr}' has no attribute lookup on this kind"), offset))
                }
            }
        }
    }

    /// Non-function attributes come back type-only (mutable through the
    /// instance); functions preserve their known value so calls resolve.
    fn class_attribute_value(&self, class_id: ClassId, attr: &str) -> Value {
        let Some(class) = self.global.class(class_id) else {
            return Value::indeterminate();
        };
        let Some(a) = class.attribute(attr) else {
            return Value::indeterminate();
        };
        if matches!(a.value.kind(), Kind::Function(_)) {
            a.value.clone()
        } else {
            a.value.clear_value()
        }
    }

    fn index_container(&self, base: &Value, index: &Value, offset: usize) -> Result<Value, CompileError> {
        if !matches!(index.kind(), Kind::Bool | Kind::Int | Kind::Indeterminate) {
            return Err(CompileError::at(CompileErrorKind::Analysis, "subscript index must be bool, int, or indeterminate", offset));
        }
        match (base.kind(), base.known()) {
            (Kind::Bytes, Some(Known::Bytes(b))) => {
                if let (Kind::Int, Some(Known::Int(i))) = (index.kind(), index.known())
                    && let Ok(idx) = usize::try_from(*i)
                    && let Some(byte) = b.get(idx)
                {
                    return Ok(Value::int_known(i64::from(*byte)));
                }
                Ok(Value::int_type())
            }
            (Kind::Unicode, Some(Known::Unicode(s))) => {
                if let (Kind::Int, Some(Known::Int(i))) = (index.kind(), index.known())
                    && let Ok(idx) = usize::try_from(*i)
                    && let Some(ch) = s.chars().nth(idx)
                {
                    return Ok(Value::unicode_known(ch.to_string()));
                }
                Ok(Value::unicode_type())
            }
            (Kind::List(elem), Some(Known::List(items))) | (Kind::Tuple(elem), Some(Known::Tuple(items))) => {
                if let (Kind::Int, Some(Known::Int(i))) = (index.kind(), index.known())
                    && let Ok(idx) = usize::try_from(*i)
                    && let Some(item) = items.get(idx)
                {
                    return Ok(item.clone());
                }
                Ok((**elem).clone())
            }
            (Kind::Dict(_, val_ty), Some(Known::Dict(items))) => {
                if let Some((_, v)) = items.iter().find(|(k, _)| k.known() == index.known() && index.known().is_some()) {
                    return Ok(v.clone());
                }
                Ok((**val_ty).clone())
            }
            (Kind::Bytes | Kind::Unicode, None) => Ok(if matches!(base.kind(), Kind::Bytes) { Value::int_type() } else { Value::unicode_type() }),
            (Kind::List(elem) | Kind::Tuple(elem), None) => Ok((**elem).clone()),
            (Kind::Dict(_, val_ty), None) => Ok((**val_ty).clone()),
            _ => Ok(Value::indeterminate()),
        }
    }

    fn apply_unop(op: UnaryOp, v: &Value) -> Value {
        match (op, v.kind(), v.known()) {
            (UnaryOp::Not, _, Some(_)) => v.truth_value().map_or_else(Value::indeterminate, |b| Value::bool_known(!b)),
            (UnaryOp::Neg, Kind::Int, Some(Known::Int(i))) => Value::int_known(-i),
            (UnaryOp::Neg, Kind::Float, Some(Known::Float(f))) => Value::float_known(-f),
            (UnaryOp::Pos, Kind::Int | Kind::Float, Some(_)) => v.clone(),
            (UnaryOp::Invert, Kind::Int, Some(Known::Int(i))) => Value::int_known(!i),
            (UnaryOp::Not, _, None) => Value::bool_type(),
            (UnaryOp::Neg | UnaryOp::Pos, Kind::Int, None) => Value::int_type(),
            (UnaryOp::Neg | UnaryOp::Pos, Kind::Float, None) => Value::float_type(),
            (UnaryOp::Invert, Kind::Int, None) => Value::int_type(),
            _ => Value::indeterminate(),
        }
    }

    /// Folds a binary operator over known operands; otherwise reduces to the
    /// result kind with unknown content. Returns `None` only when the
    /// operator is not defined at all for the operand kinds, in which case
    /// the caller falls back to `Indeterminate`.
    fn apply_binop(op: BinOp, l: &Value, r: &Value) -> Option<Value> {
        use Known::{Float, Int};
        match (op, l.known(), r.known()) {
            (BinOp::Add, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a + b)),
            (BinOp::Add, Some(Float(a)), Some(Float(b))) => Some(Value::float_known(a + b)),
            (BinOp::Add, Some(Known::Unicode(a)), Some(Known::Unicode(b))) => Some(Value::unicode_known(format!("{a}{b}"))),
            (BinOp::Sub, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a - b)),
            (BinOp::Sub, Some(Float(a)), Some(Float(b))) => Some(Value::float_known(a - b)),
            (BinOp::Mul, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a * b)),
            (BinOp::Mul, Some(Float(a)), Some(Float(b))) => Some(Value::float_known(a * b)),
            (BinOp::Div, Some(Int(a)), Some(Int(b))) if *b != 0 => Some(Value::float_known(*a as f64 / *b as f64)),
            (BinOp::Div, Some(Float(a)), Some(Float(b))) if *b != 0.0 => Some(Value::float_known(a / b)),
            (BinOp::FloorDiv, Some(Int(a)), Some(Int(b))) if *b != 0 => Some(Value::int_known(a.div_euclid(*b))),
            (BinOp::Mod, Some(Int(a)), Some(Int(b))) if *b != 0 => Some(Value::int_known(a.rem_euclid(*b))),
            (BinOp::Pow, Some(Int(a)), Some(Int(b))) if *b >= 0 => u32::try_from(*b).ok().map(|e| Value::int_known(a.pow(e))),
            (BinOp::BitAnd, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a & b)),
            (BinOp::BitOr, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a | b)),
            (BinOp::BitXor, Some(Int(a)), Some(Int(b))) => Some(Value::int_known(a ^ b)),
            (BinOp::LShift, Some(Int(a)), Some(Int(b))) => u32::try_from(*b).ok().map(|s| Value::int_known(a << s)),
            (BinOp::RShift, Some(Int(a)), Some(Int(b))) => u32::try_from(*b).ok().map(|s| Value::int_known(a >> s)),
            (BinOp::Eq, _, _) if l.known().is_some() && r.known().is_some() => Some(Value::bool_known(l == r)),
            (BinOp::NotEq, _, _) if l.known().is_some() && r.known().is_some() => Some(Value::bool_known(l != r)),
            (BinOp::Lt, Some(Int(a)), Some(Int(b))) => Some(Value::bool_known(a < b)),
            (BinOp::LtE, Some(Int(a)), Some(Int(b))) => Some(Value::bool_known(a <= b)),
            (BinOp::Gt, Some(Int(a)), Some(Int(b))) => Some(Value::bool_known(a > b)),
            (BinOp::GtE, Some(Int(a)), Some(Int(b))) => Some(Value::bool_known(a >= b)),
            (BinOp::And, Some(_), Some(_)) => Some(if l.truth_value() == Some(false) { l.clone() } else { r.clone() }),
            (BinOp::Or, Some(_), Some(_)) => Some(if l.truth_value() == Some(true) { l.clone() } else { r.clone() }),
            // Unknown content: reduce to a result kind without folding.
            _ => match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod | BinOp::Pow | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift => {
                    match (l.kind(), r.kind()) {
                        (Kind::Float, _) | (_, Kind::Float) if matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul) => Some(Value::float_type()),
                        (Kind::Int, Kind::Int) => Some(Value::int_type()),
                        _ => None,
                    }
                }
                BinOp::Div => Some(Value::float_type()),
                BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtE | BinOp::Gt | BinOp::GtE => Some(Value::bool_type()),
                BinOp::And | BinOp::Or => Some(Value::indeterminate()),
            },
        }
    }
}

/// Re-infers one function's return types against a specific fragment's
/// concrete `arg_types` (`SPEC_FULL.md` §4.4 "Fragment compilation"), rather
/// than the type each parameter happened to get during the single whole-module
/// `analyze_module` pass (the "self" rule, a default value's type, or an
/// annotation). Rebinds the function's locals to `arg_types` and replays its
/// body through a fresh `Analyzer` scoped to just this function, so a
/// parameter whose inferred type varies by call site (e.g. `x + 1` resolving
/// to `Int` for one caller and `Float` for another) gets a fragment-specific
/// return type instead of whatever the module-wide pass happened to see
/// first. The rebinding is permanent: codegen only ever looks up locals by
/// name, never by type, so there is nothing to restore afterward.
pub(crate) fn infer_fragment_return_types<Tr: JitTracer>(
    global: &mut GlobalContext,
    function_id: crate::ids::FunctionId,
    arg_types: &[Value],
    tracer: &Tr,
) -> Result<Vec<Value>, CompileError> {
    let (def, module_name, args) = {
        let func = global.function(function_id).expect("fragment compile implies a registered function");
        (
            func.ast_root.clone().expect("function has a body"),
            func.module.clone().expect("function belongs to a module"),
            func.args.clone(),
        )
    };
    if let Some(func) = global.function_mut(function_id) {
        func.return_types.clear();
        for (arg, ty) in args.iter().zip(arg_types) {
            func.set_local(&arg.name, ty.clone());
        }
    }
    let mut az = Analyzer {
        global,
        module_name,
        scopes: vec![Scope::Function(function_id)],
        last_attribute_lookup_had_class_base: false,
        tracer,
    };
    az.visit_block(&def.body)?;
    Ok(global.function(function_id).expect("function still registered").return_types.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::Module as AstModule,
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
    fn constant_folds_integer_addition() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::Assign {
                targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                value: Expr::new(
                    0,
                    ExprKind::Binary {
                        op: BinOp::Add,
                        left: Box::new(Expr::new(0, ExprKind::Int(1))),
                        right: Box::new(Expr::new(0, ExprKind::Int(2))),
                    },
                ),
            },
        )]);
        analyze_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        let v = &global.modules.get(&name).unwrap().global("x").unwrap().value;
        assert_eq!(v.known(), Some(&Known::Int(3)));
    }

    #[test]
    fn reassigning_with_a_different_type_is_rejected() {
        let (mut global, name) = setup(vec![
            Stmt::new(
                0,
                StmtKind::Assign {
                    targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                    value: Expr::new(0, ExprKind::Int(1)),
                },
            ),
            Stmt::new(
                1,
                StmtKind::Assign {
                    targets: vec![Expr::new(1, ExprKind::VariableLookup("x".into()))],
                    value: Expr::new(1, ExprKind::Unicode("s".into())),
                },
            ),
        ]);
        let err = analyze_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Analysis);
    }

    #[test]
    fn reassigning_with_a_different_known_value_demotes_to_type_only() {
        let (mut global, name) = setup(vec![
            Stmt::new(
                0,
                StmtKind::Assign {
                    targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                    value: Expr::new(0, ExprKind::Int(1)),
                },
            ),
            Stmt::new(
                1,
                StmtKind::Assign {
                    targets: vec![Expr::new(1, ExprKind::VariableLookup("x".into()))],
                    value: Expr::new(1, ExprKind::Int(2)),
                },
            ),
        ]);
        analyze_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        let v = &global.modules.get(&name).unwrap().global("x").unwrap().value;
        assert_eq!(v.known(), None);
    }

    #[test]
    fn empty_list_literal_has_indeterminate_element_type() {
        let (mut global, name) = setup(vec![Stmt::new(
            0,
            StmtKind::Assign {
                targets: vec![Expr::new(0, ExprKind::VariableLookup("x".into()))],
                value: Expr::new(0, ExprKind::List(vec![])),
            },
        )]);
        analyze_module(&mut global, &name, &crate::tracer::NoopTracer).unwrap();
        let v = &global.modules.get(&name).unwrap().global("x").unwrap().value;
        assert!(matches!(v.kind(), Kind::List(e) if e.is_indeterminate()));
    }
}
