//! C6 compilation visitor: walks an annotated-and-analyzed AST and emits
//! stack bytecode via [`super::bytecode::CodeBuilder`].
//!
//! Deliberately covers a subset of `StmtKind`/`ExprKind` — the forms needed
//! to run code after static analysis has already fixed every name's type.
//! Constructs the static visitors never need to execute at this layer
//! (comprehensions, `for`, `try`/`with`, nested defs) report
//! `CompileErrorKind::Analysis` rather than silently producing wrong code.

use ahash::AHashMap;

use crate::{
    ast::{Expr, ExprKind, Stmt, StmtKind, UnaryOp},
    compile::bytecode::CodeBuilder,
    context::{class::ClassContext, global::CallsiteRecord, module::ModuleContext},
    error::{CompileError, CompileErrorKind},
    ids::{CallsiteToken, ClassId, SplitId},
};

fn unsupported(offset: usize, what: &str) -> CompileError {
    CompileError::at(CompileErrorKind::Analysis, format!("unsupported in compiled fragment: {what}"), offset)
}

/// Walks one function body (or a module's top-level statements) and emits
/// its bytecode. `local_names` is `None` for a module root fragment, where
/// every write targets a global rather than a local slot.
pub struct FragmentCompiler<'a> {
    classes: &'a AHashMap<ClassId, ClassContext>,
    module: &'a ModuleContext,
    self_class_id: Option<ClassId>,
    local_names: Option<&'a [String]>,
    pub builder: CodeBuilder,
    pub split_labels: Vec<(SplitId, String)>,
    next_label_id: u32,
    next_callsite_token: &'a mut u64,
    callsites: &'a mut AHashMap<CallsiteToken, CallsiteRecord>,
}

impl<'a> FragmentCompiler<'a> {
    #[must_use]
    pub fn new(
        classes: &'a AHashMap<ClassId, ClassContext>,
        module: &'a ModuleContext,
        self_class_id: Option<ClassId>,
        local_names: Option<&'a [String]>,
        next_callsite_token: &'a mut u64,
        callsites: &'a mut AHashMap<CallsiteToken, CallsiteRecord>,
    ) -> Self {
        Self {
            classes,
            module,
            self_class_id,
            local_names,
            builder: CodeBuilder::new(),
            split_labels: Vec::new(),
            next_label_id: 0,
            next_callsite_token,
            callsites,
        }
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        let id = self.next_label_id;
        self.next_label_id += 1;
        format!("{prefix}{id}")
    }

    /// Allocates the next callsite token, distinct per `Call`/`Construct`
    /// opcode emitted across the whole compilation (not just this fragment).
    fn fresh_callsite_token(&mut self) -> u64 {
        let token = *self.next_callsite_token;
        *self.next_callsite_token += 1;
        token
    }

    fn local_slot(&self, name: &str) -> Option<u32> {
        self.local_names?.iter().position(|n| n == name).map(|i| i as u32)
    }

    fn global_index(&self, name: &str) -> Option<u32> {
        self.module.global(name).map(|g| g.index.index() as u32)
    }

    pub fn visit_block(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Expression(e) => {
                self.visit_expr(e)?;
                self.builder.emit_pop();
            }
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value)?;
                for (i, target) in targets.iter().enumerate() {
                    if i + 1 < targets.len() {
                        // Re-evaluating `value`'s bytecode would duplicate any
                        // side effects, so the already-pushed result is
                        // consumed once per target via a no-op "peek" path:
                        // unsupported for now since none of this pipeline's
                        // scenarios chain assignment targets.
                        return Err(unsupported(stmt.offset, "chained assignment targets"));
                    }
                    self.assign_to(target)?;
                }
            }
            StmtKind::Augment { target, op, value } => {
                self.visit_expr(&Expr::new(target.offset, target.kind.clone()))?;
                self.visit_expr(value)?;
                self.builder.emit_binop(*op);
                self.assign_to(target)?;
            }
            StmtKind::Return(value) => {
                match value {
                    Some(e) => self.visit_expr(e)?,
                    None => self.builder.emit_push_none(),
                }
                self.builder.emit_return();
            }
            StmtKind::If { branches, orelse } => self.visit_if(branches, orelse)?,
            StmtKind::While { test, body, orelse } => self.visit_while(test, body, orelse)?,
            StmtKind::Global(_) | StmtKind::Break | StmtKind::Continue => {}
            // Already materialized into a global slot by static
            // initialization (`phase.rs::initialize_global_space`); nothing
            // left to emit when the root fragment walks over them again.
            StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => {}
            StmtKind::Delete(_)
            | StmtKind::Import { .. }
            | StmtKind::ImportFrom { .. }
            | StmtKind::ImportStar { .. }
            | StmtKind::Exec(_)
            | StmtKind::Assert { .. }
            | StmtKind::Raise(_)
            | StmtKind::Yield(_)
            | StmtKind::For { .. }
            | StmtKind::Try { .. }
            | StmtKind::With { .. } => return Err(unsupported(stmt.offset, &format!("{:?}", stmt.kind))),
        }
        Ok(())
    }

    fn visit_if(&mut self, branches: &[(Expr, Vec<Stmt>)], orelse: &[Stmt]) -> Result<(), CompileError> {
        let mut end_patches = Vec::new();
        for (test, body) in branches {
            self.visit_expr(test)?;
            let skip = self.builder.emit_jump_if_false();
            self.visit_block(body)?;
            end_patches.push(self.builder.emit_jump());
            self.builder.patch_jump(skip);
        }
        self.visit_block(orelse)?;
        for patch in end_patches {
            self.builder.patch_jump(patch);
        }
        Ok(())
    }

    fn visit_while(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> Result<(), CompileError> {
        let top = self.builder.offset();
        self.visit_expr(test)?;
        let exit = self.builder.emit_jump_if_false();
        self.visit_block(body)?;
        let back = self.builder.emit_jump();
        self.builder.patch_jump_to(back, top);
        self.builder.patch_jump(exit);
        self.visit_block(orelse)?;
        Ok(())
    }

    fn assign_to(&mut self, target: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::VariableLookup(name) => {
                if let Some(slot) = self.local_slot(name) {
                    self.builder.emit_store_local(slot);
                } else if let Some(index) = self.global_index(name) {
                    self.builder.emit_store_global(index);
                } else {
                    return Err(unsupported(target.offset, &format!("assignment to undeclared name '{name}'")));
                }
                Ok(())
            }
            ExprKind::AttributeLookup { base, attr } => {
                let ExprKind::VariableLookup(base_name) = &base.kind else {
                    return Err(unsupported(target.offset, "attribute assignment on a non-`self` base"));
                };
                let Some(class_id) = self.self_class_id else {
                    return Err(unsupported(target.offset, "attribute assignment outside a method body"));
                };
                if self.local_slot(base_name) != Some(0) {
                    return Err(unsupported(target.offset, "attribute assignment on a non-`self` base"));
                }
                let index = self
                    .classes
                    .get(&class_id)
                    .and_then(|c| c.attribute_indexes.get(attr).copied())
                    .ok_or_else(|| unsupported(target.offset, &format!("unknown attribute '{attr}'")))?;
                // Value is already on the stack (pushed by the `Assign`
                // visitor before calling here); pushing `self` on top gives
                // `StoreAttr` the [value, self] order it expects.
                self.builder.emit_load_local(0);
                self.builder.emit_store_attr(index as u32);
                Ok(())
            }
            _ => Err(unsupported(target.offset, "destructuring assignment target")),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::None => self.builder.emit_push_none(),
            ExprKind::True => self.builder.emit_push_bool(true),
            ExprKind::False => self.builder.emit_push_bool(false),
            ExprKind::Int(v) => self.builder.emit_push_int(*v),
            ExprKind::Float(v) => self.builder.emit_push_float(*v),
            ExprKind::Unicode(s) => self.builder.emit_push_unicode(s.clone()),
            ExprKind::VariableLookup(name) => {
                if let Some(slot) = self.local_slot(name) {
                    self.builder.emit_load_local(slot);
                } else if let Some(index) = self.global_index(name) {
                    self.builder.emit_load_global(index);
                } else {
                    return Err(unsupported(expr.offset, &format!("reference to undeclared name '{name}'")));
                }
            }
            ExprKind::AttributeLookup { base, attr } => {
                let ExprKind::VariableLookup(base_name) = &base.kind else {
                    return Err(unsupported(expr.offset, "attribute access on a non-`self` base"));
                };
                let Some(class_id) = self.self_class_id else {
                    return Err(unsupported(expr.offset, "attribute access outside a method body"));
                };
                if self.local_slot(base_name) != Some(0) {
                    return Err(unsupported(expr.offset, "attribute access on a non-`self` base"));
                }
                let index = self
                    .classes
                    .get(&class_id)
                    .and_then(|c| c.attribute_indexes.get(attr).copied())
                    .ok_or_else(|| unsupported(expr.offset, &format!("unknown attribute '{attr}'")))?;
                self.builder.emit_load_local(0);
                self.builder.emit_load_attr(index as u32);
            }
            ExprKind::Unary { op, operand } => {
                self.visit_expr(operand)?;
                match op {
                    UnaryOp::Neg | UnaryOp::Pos => self.builder.emit_neg(),
                    UnaryOp::Not => self.builder.emit_not(),
                    UnaryOp::Invert => self.builder.emit_invert(),
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
                self.builder.emit_binop(*op);
            }
            ExprKind::Ternary { test, body, orelse } => {
                self.visit_expr(test)?;
                let else_patch = self.builder.emit_jump_if_false();
                self.visit_expr(body)?;
                let end_patch = self.builder.emit_jump();
                self.builder.patch_jump(else_patch);
                self.visit_expr(orelse)?;
                self.builder.patch_jump(end_patch);
            }
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    self.visit_expr(item)?;
                }
                self.builder.emit_build_list(items.len() as u32);
            }
            ExprKind::Dict(items) => {
                for (k, v) in items {
                    self.visit_expr(k)?;
                    self.visit_expr(v)?;
                }
                self.builder.emit_build_dict(items.len() as u32);
            }
            ExprKind::FunctionCall { callee, args, split_id, callee_function_id, arg_types } => {
                let Some(fid) = callee_function_id.get() else {
                    return Err(unsupported(expr.offset, "call with a callee not resolved by analysis"));
                };
                let is_construction = self.classes.contains_key(&ClassId::new(fid));
                for a in args {
                    self.visit_expr(a)?;
                }
                let mut recorded_arg_types = arg_types.borrow().clone().unwrap_or_default();
                if is_construction {
                    // `Construct` pushes `[instance, ...ctor_args]` at runtime
                    // (`compile/vm.rs`), so the recorded callsite types must
                    // lead with the constructed instance's own type.
                    recorded_arg_types.insert(0, crate::value::Value::instance_type(ClassId::new(fid)));
                }
                let token = self.fresh_callsite_token();
                self.callsites.insert(CallsiteToken::new(token), CallsiteRecord { arg_types: recorded_arg_types });
                if is_construction {
                    self.builder.emit_construct(fid, token, args.len() as u32);
                } else {
                    self.builder.emit_call(fid, token, args.len() as u32);
                }
                if let Some(split) = split_id.get() {
                    let label = self.fresh_label("split");
                    self.builder.place_label(label.clone());
                    self.split_labels.push((SplitId::new(split as usize), label));
                }
                let _ = callee;
            }
            ExprKind::Bytes(_) => return Err(unsupported(expr.offset, "bytes literal")),
            ExprKind::ArrayIndex { .. } | ExprKind::ArraySlice { .. } => return Err(unsupported(expr.offset, "container indexing")),
            ExprKind::Comprehension { .. } => return Err(unsupported(expr.offset, "comprehension")),
            ExprKind::Lambda(_) => return Err(unsupported(expr.offset, "lambda expression")),
        }
        Ok(())
    }
}
