use std::collections::BTreeMap;

use crate::types::Signature;
use crate::value::{Primitive, Value};

/// A heap instance: its runtime class and its fields, keyed by the full
/// field signature so shadowed superclass fields stay distinct.
#[derive(Clone, Debug)]
pub struct Instance {
    pub class_name: String,
    /// Set for objects created by expanding a symbolic reference; used to
    /// enumerate aliasing candidates and to derive member origins.
    pub origin: Option<String>,
    /// Set for interned string instances.
    pub string_literal: Option<String>,
    fields: BTreeMap<Signature, Value>,
}

impl Instance {
    pub fn new(class_name: &str, fields: BTreeMap<Signature, Value>) -> Instance {
        Instance {
            class_name: class_name.to_owned(),
            origin: None,
            string_literal: None,
            fields,
        }
    }

    pub fn field_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.fields.keys()
    }

    pub fn field_value(&self, sig: &Signature) -> Option<&Value> {
        self.fields.get(sig)
    }

    /// Stores into an existing field slot; `false` if the instance does not
    /// carry the field.
    pub fn set_field(&mut self, sig: &Signature, value: Value) -> bool {
        match self.fields.get_mut(sig) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// A heap array. Both the length and the index of each entry may be
/// symbolic; entries are kept newest-first so a store shadows older ones
/// with a structurally equal index.
#[derive(Clone, Debug)]
pub struct Array {
    /// The runtime class, e.g. `[I` or `[Lfoo/Bar;`.
    pub class_name: String,
    pub member_descriptor: String,
    pub origin: Option<String>,
    length: Primitive,
    entries: Vec<(Primitive, Value)>,
    /// True for arrays created by `newarray`/`anewarray`: every slot not
    /// covered by an entry holds the member type's default value.
    concrete_backing: bool,
}

impl Array {
    pub fn new_concrete(member_descriptor: &str, length: Primitive) -> Array {
        Array {
            class_name: format!("[{}", member_descriptor),
            member_descriptor: member_descriptor.to_owned(),
            origin: None,
            length,
            entries: Vec::new(),
            concrete_backing: true,
        }
    }

    pub fn new_symbolic(member_descriptor: &str, length: Primitive, origin: &str) -> Array {
        Array {
            class_name: format!("[{}", member_descriptor),
            member_descriptor: member_descriptor.to_owned(),
            origin: Some(origin.to_owned()),
            length,
            entries: Vec::new(),
            concrete_backing: false,
        }
    }

    pub fn length(&self) -> &Primitive {
        &self.length
    }

    pub fn has_concrete_backing(&self) -> bool {
        self.concrete_backing
    }

    /// The stored value at a structurally equal index, if any.
    pub fn entry(&self, index: &Primitive) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(i, _)| i == index)
            .map(|(_, v)| v)
    }

    pub fn store(&mut self, index: Primitive, value: Value) {
        self.entries.insert(0, (index, value));
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Primitive, &Value)> {
        self.entries.iter().map(|(i, v)| (i, v))
    }
}

/// A symbolic heap entity.
#[derive(Clone, Debug)]
pub enum Objekt {
    Instance(Instance),
    Array(Array),
}

impl Objekt {
    pub fn class_name(&self) -> &str {
        match self {
            Objekt::Instance(i) => &i.class_name,
            Objekt::Array(a) => &a.class_name,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            Objekt::Instance(i) => i.origin.as_deref(),
            Objekt::Array(a) => a.origin.as_deref(),
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Objekt::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match self {
            Objekt::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Objekt::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Objekt::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// The static-area counterpart of an instance: one class's static fields.
#[derive(Clone, Debug)]
pub struct Klass {
    pub class_name: String,
    fields: BTreeMap<Signature, Value>,
}

impl Klass {
    pub fn new(class_name: &str, fields: BTreeMap<Signature, Value>) -> Klass {
        Klass {
            class_name: class_name.to_owned(),
            fields,
        }
    }

    pub fn field_signatures(&self) -> impl Iterator<Item = &Signature> {
        self.fields.keys()
    }

    pub fn field_value(&self, sig: &Signature) -> Option<&Value> {
        self.fields.get(sig)
    }

    pub fn set_field(&mut self, sig: &Signature, value: Value) -> bool {
        match self.fields.get_mut(sig) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;
    use crate::value::{Lit, Reference};

    #[test]
    fn instance_fields_are_fixed_at_creation() {
        let sig = Signature::new("pkg/K", "I", "x");
        let mut fields = BTreeMap::new();
        fields.insert(sig.clone(), Value::Primitive(Primitive::simplex(Lit::Int(0))));
        let mut inst = Instance::new("pkg/K", fields);
        assert!(inst.set_field(&sig, Value::Primitive(Primitive::simplex(Lit::Int(7)))));
        assert_eq!(
            inst.field_value(&sig),
            Some(&Value::Primitive(Primitive::simplex(Lit::Int(7))))
        );
        let other = Signature::new("pkg/K", "I", "y");
        assert!(!inst.set_field(&other, Value::Reference(Reference::Null)));
    }

    #[test]
    fn array_stores_shadow_older_entries() {
        let mut arr = Array::new_concrete("I", Primitive::simplex(Lit::Int(4)));
        let i = Primitive::term(PrimitiveType::Int, 0);
        arr.store(i.clone(), Value::Primitive(Primitive::simplex(Lit::Int(1))));
        arr.store(i.clone(), Value::Primitive(Primitive::simplex(Lit::Int(2))));
        assert_eq!(
            arr.entry(&i),
            Some(&Value::Primitive(Primitive::simplex(Lit::Int(2))))
        );
        assert!(arr.entry(&Primitive::simplex(Lit::Int(3))).is_none());
        assert!(arr.has_concrete_backing());
    }
}
