//! The bytecode interpreter (`spec.md` §6 treats native code execution as an
//! external collaborator; this is the stand-in that actually runs a
//! fragment's assembled bytes).
//!
//! `Call`/`Construct` instructions re-enter [`crate::dispatch::jit_compile_scope`]
//! synchronously, so compilation genuinely only happens the first time a
//! function is reached with a given argument-type tuple — the "ahead of
//! need" property is upheld by never compiling a fragment this loop doesn't
//! actually call into.

use crate::{
    compile::bytecode::{self, Opcode},
    context::global::GlobalContext,
    error::{RuntimeException, RuntimeExceptionKind},
    dispatch::{self, DispatchOutcome},
    ids::{ClassId, FragmentIndex, FunctionId},
    runtime::RuntimeValue,
    tracer::JitTracer,
    value::Value,
};

/// Runs the module root fragment (compiled by [`super::compile_module_root`]).
/// Returns the uncaught exception, if any; `None` means the module's
/// top-level statements ran to completion.
pub fn run_fragment<Tr: JitTracer>(global: &mut GlobalContext, module_name: &str, tracer: &Tr) -> Option<RuntimeException> {
    let (bytes, unicode_consts) = {
        let fragment = &global.modules.get(module_name).expect("module exists").root_fragment;
        (
            fragment.compiled_bytes.clone().expect("root fragment compiled before running"),
            fragment.compiled_unicode_consts.clone(),
        )
    };
    match execute(global, module_name, &bytes, &unicode_consts, Vec::new(), tracer) {
        Ok(_) => None,
        Err(exc) => Some(exc),
    }
}

/// Runs one already-compiled function fragment with `args` bound to its
/// leading local slots, used both by the top-level dispatcher entry point
/// a host would call and recursively by `Call`/`Construct` opcodes.
pub fn run_function_fragment<Tr: JitTracer>(
    global: &mut GlobalContext,
    function_id: FunctionId,
    fragment_index: FragmentIndex,
    args: Vec<RuntimeValue>,
    tracer: &Tr,
) -> Result<RuntimeValue, RuntimeException> {
    let (module_name, bytes, unicode_consts) = {
        let func = global.functions.get(&function_id).expect("function exists");
        let fragment = func.fragment(fragment_index);
        (
            func.module.clone().expect("compiled function belongs to a module"),
            fragment.compiled_bytes.clone().expect("fragment compiled before running"),
            fragment.compiled_unicode_consts.clone(),
        )
    };
    execute(global, &module_name, &bytes, &unicode_consts, args, tracer)
}

fn execute<Tr: JitTracer>(
    global: &mut GlobalContext,
    module_name: &str,
    bytes: &[u8],
    unicode_consts: &[String],
    args: Vec<RuntimeValue>,
    tracer: &Tr,
) -> Result<RuntimeValue, RuntimeException> {
    let mut locals = args;
    let mut stack: Vec<RuntimeValue> = Vec::new();
    let mut ip = 0usize;

    loop {
        if ip >= bytes.len() {
            return Ok(RuntimeValue::None);
        }
        let op = bytecode::read_op(bytes, ip);
        ip += 1;
        match op {
            Opcode::PushInt => {
                stack.push(RuntimeValue::Int(bytecode::read_i64(bytes, ip)));
                ip += 8;
            }
            Opcode::PushFloat => {
                stack.push(RuntimeValue::Float(bytecode::read_f64(bytes, ip)));
                ip += 8;
            }
            Opcode::PushBool => {
                stack.push(RuntimeValue::Bool(bytes[ip] != 0));
                ip += 1;
            }
            Opcode::PushNone => stack.push(RuntimeValue::None),
            Opcode::PushUnicodeConst => {
                let idx = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let id = global.heap.unicode_new(unicode_consts[idx].clone());
                stack.push(RuntimeValue::Heap(id));
            }
            Opcode::LoadLocal => {
                let slot = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                stack.push(locals.get(slot).cloned().unwrap_or(RuntimeValue::None));
            }
            Opcode::StoreLocal => {
                let slot = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let value = stack.pop().expect("stack underflow: StoreLocal");
                if slot >= locals.len() {
                    locals.resize(slot + 1, RuntimeValue::None);
                }
                locals[slot] = value;
            }
            Opcode::LoadGlobal => {
                let index = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let cell = global
                    .modules
                    .get(module_name)
                    .and_then(|m| m.global_space.get(index))
                    .cloned()
                    .flatten()
                    .unwrap_or(RuntimeValue::None);
                stack.push(cell);
            }
            Opcode::StoreGlobal => {
                let index = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let value = stack.pop().expect("stack underflow: StoreGlobal");
                if let Some(m) = global.modules.get_mut(module_name) {
                    if index >= m.global_space.len() {
                        m.global_space.resize(index + 1, None);
                    }
                    m.global_space[index] = Some(value);
                }
            }
            Opcode::BinOp => {
                let tag = bytes[ip];
                ip += 1;
                let rhs = stack.pop().expect("stack underflow: BinOp rhs");
                let lhs = stack.pop().expect("stack underflow: BinOp lhs");
                stack.push(apply_binop(bytecode::binop_from_tag(tag), &lhs, &rhs, &global.heap)?);
            }
            Opcode::UnNeg => {
                let v = stack.pop().expect("stack underflow: UnNeg");
                stack.push(match v {
                    RuntimeValue::Int(i) => RuntimeValue::Int(-i),
                    RuntimeValue::Float(f) => RuntimeValue::Float(-f),
                    _ => return Err(type_error("unary '-' requires a number")),
                });
            }
            Opcode::UnNot => {
                let v = stack.pop().expect("stack underflow: UnNot");
                stack.push(RuntimeValue::Bool(!truthy(&v, &global.heap)));
            }
            Opcode::UnInvert => {
                let v = stack.pop().expect("stack underflow: UnInvert");
                stack.push(match v {
                    RuntimeValue::Int(i) => RuntimeValue::Int(!i),
                    _ => return Err(type_error("unary '~' requires an int")),
                });
            }
            Opcode::Pop => {
                stack.pop();
            }
            Opcode::Jump => {
                ip = bytecode::read_u32(bytes, ip) as usize;
            }
            Opcode::JumpIfFalse => {
                let target = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let v = stack.pop().expect("stack underflow: JumpIfFalse");
                if !truthy(&v, &global.heap) {
                    ip = target;
                }
            }
            Opcode::Return => {
                return Ok(stack.pop().unwrap_or(RuntimeValue::None));
            }
            Opcode::BuildList => {
                let count = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let items = stack.split_off(stack.len() - count);
                let list = global.heap.list_new(items.len(), true);
                for item in items {
                    global.heap.list_push(list, item);
                }
                stack.push(RuntimeValue::Heap(list));
            }
            Opcode::BuildDict => {
                let count = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let mut pairs = stack.split_off(stack.len() - count * 2);
                let dict = global.heap.dictionary_new(count, crate::runtime::DictFlags::default());
                let mut it = pairs.drain(..);
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    global.heap.dictionary_insert(dict, k, v);
                }
                stack.push(RuntimeValue::Heap(dict));
            }
            Opcode::LoadAttr => {
                let index = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let base = stack.pop().expect("stack underflow: LoadAttr");
                let RuntimeValue::Heap(id) = base else {
                    return Err(type_error("attribute access on a non-instance value"));
                };
                stack.push(global.heap.get_instance_attr(id, index).unwrap_or(RuntimeValue::None));
            }
            Opcode::StoreAttr => {
                let index = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let base = stack.pop().expect("stack underflow: StoreAttr instance");
                let value = stack.pop().expect("stack underflow: StoreAttr value");
                let RuntimeValue::Heap(id) = base else {
                    return Err(type_error("attribute assignment on a non-instance value"));
                };
                global.heap.set_instance_attr(id, index, value);
            }
            Opcode::Call => {
                let function_id = FunctionId::new(bytecode::read_i64(bytes, ip));
                ip += 8;
                let callsite_token = bytecode::read_u64(bytes, ip);
                ip += 8;
                let argc = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let call_args = stack.split_off(stack.len() - argc);
                let result = dispatch_and_run(global, function_id, call_args, callsite_token, tracer)?;
                stack.push(result);
            }
            Opcode::Construct => {
                let class_id = ClassId::new(bytecode::read_i64(bytes, ip));
                ip += 8;
                let callsite_token = bytecode::read_u64(bytes, ip);
                ip += 8;
                let argc = bytecode::read_u32(bytes, ip) as usize;
                ip += 4;
                let ctor_args = stack.split_off(stack.len() - argc);
                let attr_count = global.classes.get(&class_id).map_or(0, |c| c.attribute_count());
                let instance = global.heap.create_instance(class_id, attr_count);
                let mut call_args = Vec::with_capacity(argc + 1);
                call_args.push(RuntimeValue::Heap(instance));
                call_args.extend(ctor_args);
                dispatch_and_run(global, class_id.as_function_id(), call_args, callsite_token, tracer)?;
                stack.push(RuntimeValue::Heap(instance));
            }
        }
    }
}

fn dispatch_and_run<Tr: JitTracer>(
    global: &mut GlobalContext,
    function_id: FunctionId,
    call_args: Vec<RuntimeValue>,
    callsite_token: u64,
    tracer: &Tr,
) -> Result<RuntimeValue, RuntimeException> {
    let arg_types: Vec<Value> = global
        .callsites
        .get(&crate::ids::CallsiteToken::new(callsite_token))
        .ok_or_else(|| RuntimeException::simple(RuntimeExceptionKind::PyJitCompilerError, format!("no callsite record for token {callsite_token}")))?
        .arg_types
        .clone();

    global
        .recursion
        .enter()
        .map_err(|e| RuntimeException::simple(RuntimeExceptionKind::PyJitCompilerError, e.to_string()))?;

    tracer.on_dispatcher_enter(callsite_token);
    let outcome = dispatch::jit_compile_scope(global, function_id, &arg_types, |global, fid, arg_types| {
        crate::compile::compile_function_fragment(global, fid, arg_types, tracer)
    });
    tracer.on_dispatcher_exit(callsite_token, None);
    let result = match outcome {
        DispatchOutcome::Resolved { function_id, fragment_index } => run_function_fragment(global, function_id, fragment_index, call_args, tracer),
        DispatchOutcome::Raised(exc) => Err(exc),
    };
    global.recursion.exit();
    result
}

fn truthy(v: &RuntimeValue, heap: &crate::runtime::Heap) -> bool {
    match v {
        RuntimeValue::None => false,
        RuntimeValue::Bool(b) => *b,
        RuntimeValue::Int(i) => *i != 0,
        RuntimeValue::Float(f) => *f != 0.0,
        RuntimeValue::Heap(id) => match heap.get(*id) {
            Some(crate::runtime::HeapData::Bytes(b)) => !b.is_empty(),
            Some(crate::runtime::HeapData::Unicode(s)) => !s.is_empty(),
            Some(crate::runtime::HeapData::List(items)) => !items.is_empty(),
            Some(crate::runtime::HeapData::Dict(items)) => !items.is_empty(),
            _ => true,
        },
    }
}

fn type_error(message: &str) -> RuntimeException {
    RuntimeException::simple(RuntimeExceptionKind::TypeError, message)
}

fn apply_binop(op: crate::ast::BinOp, lhs: &RuntimeValue, rhs: &RuntimeValue, heap: &crate::runtime::Heap) -> Result<RuntimeValue, RuntimeException> {
    use crate::ast::BinOp;
    match (lhs, rhs) {
        (RuntimeValue::Int(a), RuntimeValue::Int(b)) => match op {
            BinOp::Add => Ok(RuntimeValue::Int(a + b)),
            BinOp::Sub => Ok(RuntimeValue::Int(a - b)),
            BinOp::Mul => Ok(RuntimeValue::Int(a * b)),
            BinOp::FloorDiv => checked_int_div(*a, *b).map(RuntimeValue::Int),
            BinOp::Mod => checked_int_div(*a, *b).map(|_| RuntimeValue::Int(a.rem_euclid(*b))),
            BinOp::Div => {
                if *b == 0 {
                    Err(RuntimeException::simple(RuntimeExceptionKind::ValueError, "division by zero"))
                } else {
                    Ok(RuntimeValue::Float(*a as f64 / *b as f64))
                }
            }
            BinOp::Pow => Ok(RuntimeValue::Int(a.pow(u32::try_from(*b).unwrap_or(0)))),
            BinOp::BitAnd => Ok(RuntimeValue::Int(a & b)),
            BinOp::BitOr => Ok(RuntimeValue::Int(a | b)),
            BinOp::BitXor => Ok(RuntimeValue::Int(a ^ b)),
            BinOp::LShift => Ok(RuntimeValue::Int(a << b)),
            BinOp::RShift => Ok(RuntimeValue::Int(a >> b)),
            BinOp::Eq => Ok(RuntimeValue::Bool(a == b)),
            BinOp::NotEq => Ok(RuntimeValue::Bool(a != b)),
            BinOp::Lt => Ok(RuntimeValue::Bool(a < b)),
            BinOp::LtE => Ok(RuntimeValue::Bool(a <= b)),
            BinOp::Gt => Ok(RuntimeValue::Bool(a > b)),
            BinOp::GtE => Ok(RuntimeValue::Bool(a >= b)),
            BinOp::And => Ok(RuntimeValue::Int(if *a != 0 { *b } else { *a })),
            BinOp::Or => Ok(RuntimeValue::Int(if *a != 0 { *a } else { *b })),
        },
        (RuntimeValue::Float(a), RuntimeValue::Float(b)) => apply_float_binop(op, *a, *b),
        (RuntimeValue::Int(a), RuntimeValue::Float(b)) => apply_float_binop(op, *a as f64, *b),
        (RuntimeValue::Float(a), RuntimeValue::Int(b)) => apply_float_binop(op, *a, *b as f64),
        (RuntimeValue::Heap(a), RuntimeValue::Heap(b)) => match (heap.get(*a), heap.get(*b)) {
            (Some(crate::runtime::HeapData::Unicode(x)), Some(crate::runtime::HeapData::Unicode(y))) => match op {
                crate::ast::BinOp::Eq => Ok(RuntimeValue::Bool(x == y)),
                crate::ast::BinOp::NotEq => Ok(RuntimeValue::Bool(x != y)),
                _ => Err(type_error("unsupported operator for str operands")),
            },
            _ => Err(type_error("unsupported operand types")),
        },
        _ => Err(type_error("unsupported operand types")),
    }
}

fn checked_int_div(a: i64, b: i64) -> Result<i64, RuntimeException> {
    if b == 0 {
        Err(RuntimeException::simple(RuntimeExceptionKind::ValueError, "division by zero"))
    } else {
        Ok(a.div_euclid(b))
    }
}

fn apply_float_binop(op: crate::ast::BinOp, a: f64, b: f64) -> Result<RuntimeValue, RuntimeException> {
    use crate::ast::BinOp;
    Ok(match op {
        BinOp::Add => RuntimeValue::Float(a + b),
        BinOp::Sub => RuntimeValue::Float(a - b),
        BinOp::Mul => RuntimeValue::Float(a * b),
        BinOp::Div => RuntimeValue::Float(a / b),
        BinOp::FloorDiv => RuntimeValue::Float((a / b).floor()),
        BinOp::Mod => RuntimeValue::Float(a.rem_euclid(b)),
        BinOp::Pow => RuntimeValue::Float(a.powf(b)),
        BinOp::Eq => RuntimeValue::Bool(a == b),
        BinOp::NotEq => RuntimeValue::Bool(a != b),
        BinOp::Lt => RuntimeValue::Bool(a < b),
        BinOp::LtE => RuntimeValue::Bool(a <= b),
        BinOp::Gt => RuntimeValue::Bool(a > b),
        BinOp::GtE => RuntimeValue::Bool(a >= b),
        BinOp::And | BinOp::Or | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift => {
            return Err(type_error("unsupported operator for float operands"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compile::bytecode::CodeBuilder, tracer::NoopTracer};

    #[test]
    fn arithmetic_on_ints_runs_to_completion() {
        let mut global = GlobalContext::new(vec![]);
        let mut b = CodeBuilder::new();
        b.emit_push_int(2);
        b.emit_push_int(3);
        b.emit_binop(crate::ast::BinOp::Add);
        b.emit_return();
        let (bytes, _, consts) = b.build();
        let result = execute(&mut global, "m", &bytes, &consts, Vec::new(), &NoopTracer).unwrap();
        assert_eq!(result, RuntimeValue::Int(5));
    }

    #[test]
    fn division_by_zero_raises_value_error() {
        let mut global = GlobalContext::new(vec![]);
        let mut b = CodeBuilder::new();
        b.emit_push_int(1);
        b.emit_push_int(0);
        b.emit_binop(crate::ast::BinOp::Div);
        b.emit_return();
        let (bytes, _, consts) = b.build();
        let err = execute(&mut global, "m", &bytes, &consts, Vec::new(), &NoopTracer).unwrap_err();
        assert_eq!(err.kind, RuntimeExceptionKind::ValueError);
    }
}
