//! The compile-time value lattice (`spec.md` §3, component C1).
//!
//! A [`Value`] is a type-with-optional-content: every expression, local,
//! global, and argument the static visitors reason about carries one. The
//! lattice has exactly one "don't know yet" member, [`Kind::Indeterminate`],
//! which can widen to any concrete kind exactly once per binding (enforced by
//! [`crate::analyze`], not here — this module only models the lattice and its
//! laws).

use crate::ids::{ClassId, FunctionId};

/// The type tag carried by a [`Value`]. Container kinds own their element
/// (and, for `Dict`, key+value) extension types inline so that `types_equal`
/// can walk them structurally without a side table.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    /// Type not yet known; may widen to any concrete kind exactly once.
    Indeterminate,
    /// Placeholder naming one of the *enclosing* value's own extension type
    /// slots (0 = first, 1 = second). Used only in type annotations for
    /// generic built-in signatures, e.g. "the element type of `self`".
    ExtensionTypeReference(u8),
    None,
    Bool,
    Int,
    Float,
    Bytes,
    Unicode,
    /// One extension type: the element type.
    List(Box<Value>),
    /// One extension type: the element type.
    Tuple(Box<Value>),
    /// One extension type: the element type.
    Set(Box<Value>),
    /// Two extension types: key type, then value type.
    Dict(Box<Value>, Box<Value>),
    Function(FunctionId),
    Class(ClassId),
    Instance(ClassId),
    Module(String),
}

/// The concrete contents backing a [`Value`] whose kind is statically known
/// *and* whose content was determined (constant folded, literal, or a
/// materialized container of known items).
#[derive(Debug, Clone, PartialEq)]
pub enum Known {
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Unicode(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Function(FunctionId),
    Class(ClassId),
    Module(String),
    /// Known instance attribute values, keyed by attribute name. Absent
    /// entries fall back to the class's declared (type-only) attribute.
    Instance(Vec<(String, Value)>),
}

/// A compile-time type, optionally paired with its known content.
///
/// See `spec.md` §3 invariants (i)–(vi); each is upheld by the constructors
/// and methods below rather than by the field layout alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    kind: Kind,
    known: Option<Known>,
}

impl Value {
    /// Builds a type-only value. Panics (debug) if `kind` is `Indeterminate`
    /// paired with a caller who later tries to attach content — `Indeterminate`
    /// itself is always content-free by construction.
    #[must_use]
    pub fn of_kind(kind: Kind) -> Self {
        Self { kind, known: None }
    }

    #[must_use]
    pub fn indeterminate() -> Self {
        Self::of_kind(Kind::Indeterminate)
    }

    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: Kind::None,
            known: None,
        }
    }

    #[must_use]
    pub fn bool_known(b: bool) -> Self {
        Self {
            kind: Kind::Bool,
            known: Some(Known::Bool(b)),
        }
    }

    #[must_use]
    pub fn bool_type() -> Self {
        Self::of_kind(Kind::Bool)
    }

    #[must_use]
    pub fn int_known(v: i64) -> Self {
        Self {
            kind: Kind::Int,
            known: Some(Known::Int(v)),
        }
    }

    #[must_use]
    pub fn int_type() -> Self {
        Self::of_kind(Kind::Int)
    }

    #[must_use]
    pub fn float_known(v: f64) -> Self {
        Self {
            kind: Kind::Float,
            known: Some(Known::Float(v)),
        }
    }

    #[must_use]
    pub fn float_type() -> Self {
        Self::of_kind(Kind::Float)
    }

    #[must_use]
    pub fn unicode_known(s: String) -> Self {
        Self {
            kind: Kind::Unicode,
            known: Some(Known::Unicode(s)),
        }
    }

    #[must_use]
    pub fn unicode_type() -> Self {
        Self::of_kind(Kind::Unicode)
    }

    #[must_use]
    pub fn bytes_known(b: Vec<u8>) -> Self {
        Self {
            kind: Kind::Bytes,
            known: Some(Known::Bytes(b)),
        }
    }

    #[must_use]
    pub fn bytes_type() -> Self {
        Self::of_kind(Kind::Bytes)
    }

    /// Builds a `List` value from known items, inferring the element
    /// extension type: `Indeterminate` for an empty list, the unique element
    /// type-only kind if items are homogeneous, else `Indeterminate`.
    #[must_use]
    pub fn list_known(items: Vec<Value>) -> Self {
        let elem = homogeneous_element_type(&items);
        Self {
            kind: Kind::List(Box::new(elem)),
            known: Some(Known::List(items)),
        }
    }

    #[must_use]
    pub fn list_type(elem: Value) -> Self {
        Self::of_kind(Kind::List(Box::new(elem.clear_value())))
    }

    #[must_use]
    pub fn tuple_known(items: Vec<Value>) -> Self {
        let elem = homogeneous_element_type(&items);
        Self {
            kind: Kind::Tuple(Box::new(elem)),
            known: Some(Known::Tuple(items)),
        }
    }

    #[must_use]
    pub fn tuple_type(elem: Value) -> Self {
        Self::of_kind(Kind::Tuple(Box::new(elem.clear_value())))
    }

    #[must_use]
    pub fn set_known(items: Vec<Value>) -> Self {
        let elem = homogeneous_element_type(&items);
        Self {
            kind: Kind::Set(Box::new(elem)),
            known: Some(Known::Set(items)),
        }
    }

    #[must_use]
    pub fn set_type(elem: Value) -> Self {
        Self::of_kind(Kind::Set(Box::new(elem.clear_value())))
    }

    #[must_use]
    pub fn dict_known(items: Vec<(Value, Value)>) -> Self {
        let key_ty = homogeneous_element_type(&items.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>());
        let val_ty = homogeneous_element_type(&items.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>());
        Self {
            kind: Kind::Dict(Box::new(key_ty), Box::new(val_ty)),
            known: Some(Known::Dict(items)),
        }
    }

    #[must_use]
    pub fn dict_type(key: Value, val: Value) -> Self {
        Self::of_kind(Kind::Dict(Box::new(key.clear_value()), Box::new(val.clear_value())))
    }

    #[must_use]
    pub fn function_known(id: FunctionId) -> Self {
        Self {
            kind: Kind::Function(id),
            known: Some(Known::Function(id)),
        }
    }

    #[must_use]
    pub fn class_known(id: ClassId) -> Self {
        Self {
            kind: Kind::Class(id),
            known: Some(Known::Class(id)),
        }
    }

    #[must_use]
    pub fn module_known(name: String) -> Self {
        Self {
            kind: Kind::Module(name.clone()),
            known: Some(Known::Module(name)),
        }
    }

    #[must_use]
    pub fn instance_type(class_id: ClassId) -> Self {
        Self::of_kind(Kind::Instance(class_id))
    }

    #[must_use]
    pub fn instance_known(class_id: ClassId, attrs: Vec<(String, Value)>) -> Self {
        Self {
            kind: Kind::Instance(class_id),
            known: Some(Known::Instance(attrs)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    #[must_use]
    pub fn known(&self) -> Option<&Known> {
        self.known.as_ref()
    }

    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        matches!(self.kind, Kind::Indeterminate)
    }

    /// `types_equal` (`spec.md` §3 invariant iii): compares kind and
    /// recursively compares any extension types, ignoring known content
    /// entirely (including nested containers' contents).
    #[must_use]
    pub fn types_equal(&self, other: &Value) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Indeterminate, Kind::Indeterminate)
            | (Kind::None, Kind::None)
            | (Kind::Bool, Kind::Bool)
            | (Kind::Int, Kind::Int)
            | (Kind::Float, Kind::Float)
            | (Kind::Bytes, Kind::Bytes)
            | (Kind::Unicode, Kind::Unicode) => true,
            (Kind::ExtensionTypeReference(a), Kind::ExtensionTypeReference(b)) => a == b,
            (Kind::List(a), Kind::List(b))
            | (Kind::Tuple(a), Kind::Tuple(b))
            | (Kind::Set(a), Kind::Set(b)) => a.types_equal(b),
            (Kind::Dict(ak, av), Kind::Dict(bk, bv)) => ak.types_equal(bk) && av.types_equal(bv),
            (Kind::Function(a), Kind::Function(b)) => a == b,
            (Kind::Class(a), Kind::Class(b)) => a == b,
            (Kind::Instance(a), Kind::Instance(b)) => a == b,
            (Kind::Module(a), Kind::Module(b)) => a == b,
            _ => false,
        }
    }

    /// `clear_value` (`spec.md` §3 invariant v): demotes to the type-only
    /// form, recursively clearing any extension types so the result carries
    /// no content anywhere in the tree.
    #[must_use]
    pub fn clear_value(&self) -> Value {
        let kind = match &self.kind {
            Kind::List(e) => Kind::List(Box::new(e.clear_value())),
            Kind::Tuple(e) => Kind::Tuple(Box::new(e.clear_value())),
            Kind::Set(e) => Kind::Set(Box::new(e.clear_value())),
            Kind::Dict(k, v) => Kind::Dict(Box::new(k.clear_value()), Box::new(v.clear_value())),
            other => other.clone(),
        };
        Value { kind, known: None }
    }

    /// `truth_value` (`spec.md` §3 invariant vi): defined only for known
    /// values. `None`, empty containers, zero, and empty strings are falsy;
    /// everything else known is truthy. Functions, classes, and modules are
    /// always truthy when known.
    #[must_use]
    pub fn truth_value(&self) -> Option<bool> {
        match (&self.kind, &self.known) {
            (Kind::None, _) => Some(false),
            (Kind::Bool, Some(Known::Bool(b))) => Some(*b),
            (Kind::Int, Some(Known::Int(v))) => Some(*v != 0),
            (Kind::Float, Some(Known::Float(v))) => Some(*v != 0.0),
            (Kind::Bytes, Some(Known::Bytes(b))) => Some(!b.is_empty()),
            (Kind::Unicode, Some(Known::Unicode(s))) => Some(!s.is_empty()),
            (Kind::List(_), Some(Known::List(items))) => Some(!items.is_empty()),
            (Kind::Tuple(_), Some(Known::Tuple(items))) => Some(!items.is_empty()),
            (Kind::Set(_), Some(Known::Set(items))) => Some(!items.is_empty()),
            (Kind::Dict(..), Some(Known::Dict(items))) => Some(!items.is_empty()),
            (Kind::Function(_), Some(_)) | (Kind::Class(_), Some(_)) | (Kind::Module(_), Some(_)) => Some(true),
            _ => None,
        }
    }
}

/// Element-extension-type inference shared by list/tuple/set literal
/// construction: empty ⇒ `Indeterminate`; homogeneous ⇒ that type-only kind;
/// mixed ⇒ `Indeterminate`.
fn homogeneous_element_type(items: &[Value]) -> Value {
    let mut iter = items.iter();
    let Some(first) = iter.next() else {
        return Value::indeterminate();
    };
    let first_ty = first.clear_value();
    for item in iter {
        if !item.clear_value().types_equal(&first_ty) {
            return Value::indeterminate();
        }
    }
    first_ty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_literal_has_indeterminate_element_type() {
        let v = Value::list_known(vec![]);
        assert!(matches!(v.kind(), Kind::List(e) if e.is_indeterminate()));
    }

    #[test]
    fn mixed_list_literal_has_indeterminate_element_type() {
        let v = Value::list_known(vec![Value::int_known(1), Value::unicode_known("x".into())]);
        assert!(matches!(v.kind(), Kind::List(e) if e.is_indeterminate()));
    }

    #[test]
    fn types_equal_ignores_known_content() {
        let a = Value::int_known(1);
        let b = Value::int_known(2);
        assert!(a.types_equal(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn types_equal_is_transitive() {
        let a = Value::list_type(Value::int_type());
        let b = Value::list_known(vec![Value::int_known(1)]);
        let c = Value::list_known(vec![Value::int_known(2), Value::int_known(3)]);
        assert!(a.types_equal(&b));
        assert!(b.types_equal(&c));
        assert!(a.types_equal(&c));
    }

    #[test]
    fn clear_value_demotes_nested_containers() {
        let v = Value::list_known(vec![Value::int_known(1), Value::int_known(2)]);
        let cleared = v.clear_value();
        assert_eq!(cleared.known(), None);
        assert!(cleared.types_equal(&v));
    }

    #[test]
    fn truth_value_undefined_for_unknown() {
        assert_eq!(Value::int_type().truth_value(), None);
        assert_eq!(Value::int_known(0).truth_value(), Some(false));
        assert_eq!(Value::int_known(5).truth_value(), Some(true));
        assert_eq!(Value::none().truth_value(), Some(false));
    }
}
