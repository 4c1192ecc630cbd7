//! Class context (`spec.md` §3 "Class context").

use ahash::AHashMap;

use crate::{ast::ClassDef, ids::ClassId, value::Value};

#[derive(Debug, Clone)]
pub struct ClassAttribute {
    pub name: String,
    pub value: Value,
}

/// A declared class's static metadata.
///
/// Attribute order is *inheritance-extended*: when a class has a parent, the
/// parent's attribute list forms a prefix and the child's newly added names
/// follow (`spec.md` §3 invariant). Instance layout places attributes at
/// cell offsets `header_size + index*cell_size`, which is why preserving
/// this prefix relationship matters even though this crate's object runtime
/// stores instance attributes in a `Vec` rather than raw memory.
#[derive(Debug)]
pub struct ClassContext {
    pub id: ClassId,
    pub module: Option<String>,
    pub name: String,
    pub parent_class_id: Option<ClassId>,
    pub ast_root: Option<ClassDef>,
    pub attributes: Vec<ClassAttribute>,
    pub attribute_indexes: AHashMap<String, usize>,
    /// Generated once the class def is compiled.
    pub has_destructor: bool,
}

impl ClassContext {
    #[must_use]
    pub fn new(id: ClassId, module: Option<String>, name: String) -> Self {
        Self {
            id,
            module,
            name,
            parent_class_id: None,
            ast_root: None,
            attributes: Vec::new(),
            attribute_indexes: AHashMap::new(),
            has_destructor: false,
        }
    }

    /// Copies `parent`'s attribute list as a prefix before this class's own
    /// attributes are appended by the annotation visitor.
    pub fn extend_from_parent(&mut self, parent: &ClassContext) {
        debug_assert!(self.attributes.is_empty(), "parent must be merged before own attributes are added");
        self.parent_class_id = Some(parent.id);
        for attr in &parent.attributes {
            self.push_attribute(attr.name.clone(), attr.value.clone());
        }
    }

    /// Appends a new attribute, or is a no-op if the name already exists
    /// (the annotation visitor tolerates repeated `self.x = ...` writes
    /// inside `__init__`, but not duplicate class-body declarations — that
    /// check happens in the caller).
    pub fn push_attribute(&mut self, name: String, value: Value) {
        if let Some(&index) = self.attribute_indexes.get(&name) {
            self.attributes[index].value = value;
            return;
        }
        let index = self.attributes.len();
        self.attribute_indexes.insert(name.clone(), index);
        self.attributes.push(ClassAttribute { name, value });
    }

    #[must_use]
    pub fn has_own_attribute(&self, name: &str) -> bool {
        self.attribute_indexes.contains_key(name)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&ClassAttribute> {
        self.attribute_indexes.get(name).map(|&i| &self.attributes[i])
    }

    #[must_use]
    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn offset_for_attribute(index: usize) -> usize {
        const HEADER_SIZE: usize = 16;
        const CELL_SIZE: usize = 8;
        HEADER_SIZE + index * CELL_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_attributes_form_a_prefix() {
        let mut parent = ClassContext::new(ClassId::new(1), None, "Base".into());
        parent.push_attribute("a".into(), Value::int_type());
        let mut child = ClassContext::new(ClassId::new(2), None, "Derived".into());
        child.extend_from_parent(&parent);
        child.push_attribute("b".into(), Value::unicode_type());
        assert_eq!(child.attributes[0].name, "a");
        assert_eq!(child.attributes[1].name, "b");
    }
}
