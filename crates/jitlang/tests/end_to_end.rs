//! End-to-end scenarios (`spec.md` §8 "End-to-end scenarios"), driven
//! through real source text via `jitlang::run_module` rather than hand-built
//! ASTs, exercising the full `Initial -> Imported` pipeline.

use jitlang::{
    GlobalContext, RuntimeValue,
    context::module::Phase,
    dispatch::match_value_to_type,
    runtime::HeapData,
    tracer::NoopTracer,
    value::{Kind, Value},
};

fn run(source: &str) -> GlobalContext {
    let mut global = GlobalContext::new(vec![]);
    jitlang::run_module(&mut global, "m", source.to_owned(), &NoopTracer).unwrap();
    global
}

fn function_id_of(global: &GlobalContext, name: &str) -> jitlang::FunctionId {
    let Kind::Function(id) = *global.modules.get("m").unwrap().global(name).unwrap().value.kind() else {
        panic!("'{name}' is not a known function");
    };
    id
}

/// Scenario 1: type-specialized call.
#[test]
fn type_specialized_call_produces_two_fragments() {
    let global = run("def f(x): return x + 1\na = f(3)\nb = f(3.5)\n");

    let fid = function_id_of(&global, "f");
    let func = global.functions.get(&fid).unwrap();
    assert_eq!(func.fragments.len(), 2);
    assert!(func.fragments.iter().any(|fr| matches!(fr.arg_types.as_slice(), [v] if *v.kind() == Kind::Int) && *fr.return_type.kind() == Kind::Int));
    assert!(func.fragments.iter().any(|fr| matches!(fr.arg_types.as_slice(), [v] if *v.kind() == Kind::Float) && *fr.return_type.kind() == Kind::Float));

    let module = global.modules.get("m").unwrap();
    let a = module.global_space[module.global("a").unwrap().index.index()].clone();
    let b = module.global_space[module.global("b").unwrap().index.index()].clone();
    assert_eq!(a, Some(RuntimeValue::Int(4)));
    assert_eq!(b, Some(RuntimeValue::Float(4.5)));
}

/// Scenario 2: constructor id equality.
#[test]
fn constructor_id_equals_class_id() {
    let global = run("class C:\n    def __init__(self):\n        self.x = 1\n");

    let Kind::Class(class_id) = *global.modules.get("m").unwrap().global("C").unwrap().value.kind() else {
        panic!("'C' is not a known class");
    };
    let ctor_id = class_id.as_function_id();
    let ctor = global.functions.get(&ctor_id).expect("constructor registered under the class's own id");
    assert_eq!(ctor.name, "__init__");

    let class = global.classes.get(&class_id).unwrap();
    let x = class.attribute("x").expect("attribute 'x' recorded on the class");
    assert_eq!(*x.value.kind(), Kind::Int);
}

/// Scenario 3: cycle detection across two modules importing each other.
#[test]
fn cyclic_import_is_a_compile_time_error() {
    let mut global = GlobalContext::new(vec![]);
    global.get_or_create_module("a", "from b import q\n".to_owned());
    global.get_or_create_module("b", "from a import p\n".to_owned());

    let err = jitlang::advance_module(&mut global, "a", Phase::Imported, &NoopTracer).unwrap_err();
    assert_eq!(err.kind, jitlang::CompileErrorKind::Cycle);
}

/// Scenario 4: subclass dispatch — an instance of a subclass matches a
/// callsite typed for the superclass at zero promotion cost.
#[test]
fn subclass_instance_matches_superclass_parameter_type() {
    let global = run("class B:\n    pass\n\nclass D(B):\n    pass\n");

    let Kind::Class(base_id) = *global.modules.get("m").unwrap().global("B").unwrap().value.kind() else {
        panic!("'B' is not a known class");
    };
    let Kind::Class(derived_id) = *global.modules.get("m").unwrap().global("D").unwrap().value.kind() else {
        panic!("'D' is not a known class");
    };

    let expected = Value::instance_type(base_id);
    let actual = Value::instance_type(derived_id);
    assert_eq!(match_value_to_type(&expected, &actual, &global.classes), 0);
}

/// Scenario 5: static initialization of a module-level list literal.
#[test]
fn static_list_initializer_builds_a_shared_runtime_list() {
    let global = run("K = [1, 2, 3]\n");

    let module = global.modules.get("m").unwrap();
    let cell = module.global_space[module.global("K").unwrap().index.index()].clone();
    let Some(RuntimeValue::Heap(id)) = cell else {
        panic!("expected K to hold a heap-allocated list");
    };
    let Some(HeapData::List(items)) = global.heap.get(id) else {
        panic!("expected a list payload");
    };
    assert_eq!(items, &[RuntimeValue::Int(1), RuntimeValue::Int(2), RuntimeValue::Int(3)]);
}

/// Scenario 6: JIT recompile — a second call with a new argument type grows
/// a second fragment for the same function.
#[test]
fn second_call_with_a_new_type_appends_a_fragment() {
    let global = run("def g(x): return x\na = g(1)\nb = g('s')\n");

    let fid = function_id_of(&global, "g");
    let func = global.functions.get(&fid).unwrap();
    assert_eq!(func.fragments.len(), 2);
    assert!(func.fragments[0].is_compiled());
    assert!(func.fragments[1].is_compiled());

    let module = global.modules.get("m").unwrap();
    let a = module.global_space[module.global("a").unwrap().index.index()].clone();
    assert_eq!(a, Some(RuntimeValue::Int(1)));
    let Some(RuntimeValue::Heap(id)) = module.global_space[module.global("b").unwrap().index.index()].clone() else {
        panic!("expected b to hold a heap-allocated string");
    };
    assert_eq!(global.heap.get(id), Some(&HeapData::Unicode("s".to_owned())));
}
