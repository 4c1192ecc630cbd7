//! Object runtime interface and a small reference-counted heap realizing it
//! (`spec.md` §6 "Object runtime interface").
//!
//! The pipeline only ever reasons about compile-time [`crate::value::Value`]s;
//! this module is what a fragment's emitted code and the static-initializer
//! step in [`crate::phase`] actually allocate into at runtime.

use ahash::AHashMap;

use crate::ids::{ClassId, FunctionId};

/// Dictionary-insert flags (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DictFlags {
    pub keys_are_objects: bool,
    pub values_are_objects: bool,
}

/// A materialized runtime object. Container payloads hold [`HeapId`]s rather
/// than nested [`RuntimeValue`]s so the heap can refcount them independently.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Heap(HeapId),
}

/// A heap-allocated payload, refcounted by [`Heap`].
#[derive(Debug, Clone, PartialEq)]
pub enum HeapData {
    Bytes(Vec<u8>),
    Unicode(String),
    List(Vec<RuntimeValue>),
    Dict(Vec<(RuntimeValue, RuntimeValue)>),
    Instance { class_id: ClassId, attrs: Vec<RuntimeValue> },
    Function(FunctionId),
    Class(ClassId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(u32);

/// The reference-counted object runtime (`spec.md` §6, §5 "resource
/// ownership": "the object runtime performs reference counting").
///
/// Mirrors the required operation set exactly; there is no garbage collector
/// (`spec.md` §1 Non-goals) — `delete_reference` is the only way a cell is
/// ever freed.
#[derive(Debug, Default)]
pub struct Heap {
    slots: AHashMap<HeapId, (HeapData, u32)>,
    next_id: u32,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = HeapId(self.next_id);
        self.next_id += 1;
        self.slots.insert(id, (data, 1));
        id
    }

    pub fn bytes_new(&mut self, bytes: Vec<u8>) -> HeapId {
        self.alloc(HeapData::Bytes(bytes))
    }

    pub fn unicode_new(&mut self, s: String) -> HeapId {
        self.alloc(HeapData::Unicode(s))
    }

    #[must_use]
    pub fn bytes_at(&self, id: HeapId, index: usize) -> Option<u8> {
        match self.slots.get(&id)?.0 {
            HeapData::Bytes(ref b) => b.get(index).copied(),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_length(&self, id: HeapId) -> Option<usize> {
        match self.slots.get(&id)?.0 {
            HeapData::Bytes(ref b) => Some(b.len()),
            _ => None,
        }
    }

    #[must_use]
    pub fn unicode_encode_ascii(&self, id: HeapId) -> Option<Vec<u8>> {
        match self.slots.get(&id)?.0 {
            HeapData::Unicode(ref s) if s.is_ascii() => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_decode_ascii(&self, id: HeapId) -> Option<String> {
        match self.slots.get(&id)?.0 {
            HeapData::Bytes(ref b) if b.is_ascii() => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// `items_are_objects` mirrors the interface's flag but this heap always
    /// stores [`RuntimeValue`] uniformly, so it has no effect on storage.
    pub fn list_new(&mut self, capacity: usize, _items_are_objects: bool) -> HeapId {
        self.alloc(HeapData::List(Vec::with_capacity(capacity)))
    }

    pub fn dictionary_new(&mut self, capacity: usize, _flags: DictFlags) -> HeapId {
        self.alloc(HeapData::Dict(Vec::with_capacity(capacity)))
    }

    pub fn dictionary_insert(&mut self, dict: HeapId, key: RuntimeValue, value: RuntimeValue) {
        if let Some((HeapData::Dict(items), _)) = self.slots.get_mut(&dict) {
            items.push((key, value));
        }
    }

    pub fn list_push(&mut self, list: HeapId, value: RuntimeValue) {
        if let Some((HeapData::List(items), _)) = self.slots.get_mut(&list) {
            items.push(value);
        }
    }

    pub fn create_instance(&mut self, class_id: ClassId, attr_count: usize) -> HeapId {
        self.alloc(HeapData::Instance {
            class_id,
            attrs: vec![RuntimeValue::None; attr_count],
        })
    }

    #[must_use]
    pub fn get_instance_attr(&self, id: HeapId, index: usize) -> Option<RuntimeValue> {
        match self.slots.get(&id)?.0 {
            HeapData::Instance { ref attrs, .. } => attrs.get(index).cloned(),
            _ => None,
        }
    }

    pub fn set_instance_attr(&mut self, id: HeapId, index: usize, value: RuntimeValue) {
        if let Some((HeapData::Instance { attrs, .. }, _)) = self.slots.get_mut(&id)
            && let Some(slot) = attrs.get_mut(index)
        {
            *slot = value;
        }
    }

    #[must_use]
    pub fn instance_class_id(&self, id: HeapId) -> Option<ClassId> {
        match self.slots.get(&id)?.0 {
            HeapData::Instance { class_id, .. } => Some(class_id),
            _ => None,
        }
    }

    pub fn function_new(&mut self, id: FunctionId) -> HeapId {
        self.alloc(HeapData::Function(id))
    }

    pub fn class_new(&mut self, id: ClassId) -> HeapId {
        self.alloc(HeapData::Class(id))
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> Option<&HeapData> {
        self.slots.get(&id).map(|(data, _)| data)
    }

    pub fn retain_reference(&mut self, id: HeapId) {
        if let Some((_, count)) = self.slots.get_mut(&id) {
            *count += 1;
        }
    }

    /// `delete_reference`: decrements the refcount and frees the slot at
    /// zero. The sole way memory is ever released in this runtime.
    pub fn delete_reference(&mut self, id: HeapId) {
        if let Some((_, count)) = self.slots.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.slots.remove(&id);
            }
        }
    }

    #[must_use]
    pub fn refcount(&self, id: HeapId) -> Option<u32> {
        self.slots.get(&id).map(|(_, c)| *c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_reference_frees_at_zero() {
        let mut heap = Heap::new();
        let id = heap.bytes_new(vec![1, 2, 3]);
        heap.retain_reference(id);
        assert_eq!(heap.refcount(id), Some(2));
        heap.delete_reference(id);
        assert_eq!(heap.refcount(id), Some(1));
        heap.delete_reference(id);
        assert!(heap.get(id).is_none());
    }

    #[test]
    fn list_push_and_dict_insert_round_trip() {
        let mut heap = Heap::new();
        let list = heap.list_new(0, true);
        heap.list_push(list, RuntimeValue::Int(1));
        assert!(matches!(heap.get(list), Some(HeapData::List(items)) if items.len() == 1));

        let dict = heap.dictionary_new(0, DictFlags::default());
        heap.dictionary_insert(dict, RuntimeValue::Int(1), RuntimeValue::Int(2));
        assert!(matches!(heap.get(dict), Some(HeapData::Dict(items)) if items.len() == 1));
    }
}
