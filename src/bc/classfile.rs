use std::rc::Rc;

use crate::bc::HierError;
use crate::types::Signature;

pub const CLINIT_NAME: &str = "<clinit>";
pub const CLINIT_DESCRIPTOR: &str = "()V";

/// Member visibility, from the access flags of the hosted class file.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Visibility {
    Public,
    Protected,
    Package,
    Private,
}

/// An entry of the constant pool, already typed: the engine consumes the
/// class file as a read-only oracle and never parses the binary format.
#[derive(Clone, Debug)]
pub enum ConstPoolEntry {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    ClassRef(String),
    FieldRef(Signature),
    MethodRef(Signature),
    InterfaceMethodRef(Signature),
}

#[derive(Clone, Debug)]
pub struct FieldInfo {
    pub signature: Signature,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    /// Compile-time `ConstantValue` attribute, when present.
    pub constant_value: Option<ConstPoolEntry>,
}

#[derive(Clone, Debug)]
pub struct ExceptionHandler {
    pub start_pc: usize,
    pub end_pc: usize,
    pub handler_pc: usize,
    /// `None` catches everything (a `finally` handler).
    pub catch_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Code {
    pub max_locals: usize,
    pub bytecode: Rc<[u8]>,
    pub handlers: Vec<ExceptionHandler>,
}

#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub signature: Signature,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_native: bool,
    pub is_abstract: bool,
    pub code: Option<Rc<Code>>,
}

/// The parsed class file of one class, consumed read-only.
#[derive(Clone, Debug)]
pub struct ClassFile {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_public: bool,
    pub is_interface: bool,
    pub is_abstract: bool,
    constant_pool: Vec<ConstPoolEntry>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
}

impl ClassFile {
    pub fn cp_entry(&self, index: u16) -> Result<&ConstPoolEntry, HierError> {
        self.constant_pool
            .get(index as usize)
            .ok_or(HierError::InvalidIndex(index))
    }

    /// The field signature at a constant pool index, as consumed by the
    /// field access bytecodes.
    pub fn field_signature(&self, index: u16) -> Result<&Signature, HierError> {
        match self.cp_entry(index)? {
            ConstPoolEntry::FieldRef(sig) => Ok(sig),
            _ => Err(HierError::InvalidIndex(index)),
        }
    }

    /// The method signature at a constant pool index; the flag reports
    /// whether the entry is an interface method reference.
    pub fn method_signature(&self, index: u16) -> Result<(&Signature, bool), HierError> {
        match self.cp_entry(index)? {
            ConstPoolEntry::MethodRef(sig) => Ok((sig, false)),
            ConstPoolEntry::InterfaceMethodRef(sig) => Ok((sig, true)),
            _ => Err(HierError::InvalidIndex(index)),
        }
    }

    pub fn class_ref(&self, index: u16) -> Result<&str, HierError> {
        match self.cp_entry(index)? {
            ConstPoolEntry::ClassRef(name) => Ok(name),
            _ => Err(HierError::InvalidIndex(index)),
        }
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Looks up a declared field by name and descriptor.
    pub fn find_field(&self, sig: &Signature) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.signature.name == sig.name && f.signature.descriptor == sig.descriptor)
    }

    pub fn find_method(&self, sig: &Signature) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.signature.name == sig.name && m.signature.descriptor == sig.descriptor)
    }

    pub fn is_field_static(&self, sig: &Signature) -> Result<bool, HierError> {
        self.find_field(sig)
            .map(|f| f.is_static)
            .ok_or_else(|| HierError::FieldNotFound(sig.to_string()))
    }

    /// Whether the field carries a compile-time `ConstantValue`.
    pub fn is_field_constant(&self, sig: &Signature) -> Result<bool, HierError> {
        self.find_field(sig)
            .map(|f| f.constant_value.is_some())
            .ok_or_else(|| HierError::FieldNotFound(sig.to_string()))
    }

    pub fn field_constant_value(&self, sig: &Signature) -> Result<&ConstPoolEntry, HierError> {
        let f = self
            .find_field(sig)
            .ok_or_else(|| HierError::FieldNotFound(sig.to_string()))?;
        f.constant_value
            .as_ref()
            .ok_or_else(|| HierError::AttributeNotFound(format!("ConstantValue of {}", sig)))
    }

    pub fn clinit(&self) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.signature.name == CLINIT_NAME && m.signature.descriptor == CLINIT_DESCRIPTOR)
    }

    /// Interfaces trigger initialization only when they declare at least one
    /// non-abstract method.
    pub fn has_nonabstract_methods(&self) -> bool {
        self.methods
            .iter()
            .any(|m| !m.is_abstract && m.signature.name != CLINIT_NAME)
    }
}

/// In-memory assembler for class files, used by embedders and tests.
pub struct ClassFileBuilder {
    cf: ClassFile,
}

impl ClassFileBuilder {
    pub fn new(name: &str) -> ClassFileBuilder {
        ClassFileBuilder {
            cf: ClassFile {
                name: name.to_owned(),
                superclass: if name == "java/lang/Object" {
                    None
                } else {
                    Some("java/lang/Object".to_owned())
                },
                interfaces: Vec::new(),
                is_public: true,
                is_interface: false,
                is_abstract: false,
                constant_pool: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub fn superclass(mut self, name: &str) -> Self {
        self.cf.superclass = Some(name.to_owned());
        self
    }

    pub fn no_superclass(mut self) -> Self {
        self.cf.superclass = None;
        self
    }

    pub fn interface_of(mut self, name: &str) -> Self {
        self.cf.interfaces.push(name.to_owned());
        self
    }

    pub fn package_visible(mut self) -> Self {
        self.cf.is_public = false;
        self
    }

    pub fn interface(mut self) -> Self {
        self.cf.is_interface = true;
        self.cf.is_abstract = true;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.cf.is_abstract = true;
        self
    }

    /// Appends a constant pool entry and returns its index.
    pub fn cp(&mut self, entry: ConstPoolEntry) -> u16 {
        self.cf.constant_pool.push(entry);
        (self.cf.constant_pool.len() - 1) as u16
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.add_field(name, descriptor, Visibility::Public, false, None);
        self
    }

    pub fn static_field(mut self, name: &str, descriptor: &str) -> Self {
        self.add_field(name, descriptor, Visibility::Public, true, None);
        self
    }

    pub fn constant_static_field(
        mut self,
        name: &str,
        descriptor: &str,
        value: ConstPoolEntry,
    ) -> Self {
        self.add_field(name, descriptor, Visibility::Public, true, Some(value));
        self
    }

    pub fn field_with_visibility(
        mut self,
        name: &str,
        descriptor: &str,
        visibility: Visibility,
        is_static: bool,
    ) -> Self {
        self.add_field(name, descriptor, visibility, is_static, None);
        self
    }

    fn add_field(
        &mut self,
        name: &str,
        descriptor: &str,
        visibility: Visibility,
        is_static: bool,
        constant_value: Option<ConstPoolEntry>,
    ) {
        self.cf.fields.push(FieldInfo {
            signature: Signature::new(&self.cf.name, descriptor, name),
            visibility,
            is_static,
            is_final: constant_value.is_some(),
            constant_value,
        });
    }

    pub fn method(
        mut self,
        name: &str,
        descriptor: &str,
        is_static: bool,
        max_locals: usize,
        bytecode: Vec<u8>,
    ) -> Self {
        self.add_method(name, descriptor, is_static, max_locals, bytecode, Vec::new());
        self
    }

    pub fn method_with_handlers(
        mut self,
        name: &str,
        descriptor: &str,
        is_static: bool,
        max_locals: usize,
        bytecode: Vec<u8>,
        handlers: Vec<ExceptionHandler>,
    ) -> Self {
        self.add_method(name, descriptor, is_static, max_locals, bytecode, handlers);
        self
    }

    pub fn native_method(mut self, name: &str, descriptor: &str, is_static: bool) -> Self {
        self.cf.methods.push(MethodInfo {
            signature: Signature::new(&self.cf.name, descriptor, name),
            visibility: Visibility::Public,
            is_static,
            is_native: true,
            is_abstract: false,
            code: None,
        });
        self
    }

    pub fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.cf.methods.push(MethodInfo {
            signature: Signature::new(&self.cf.name, descriptor, name),
            visibility: Visibility::Public,
            is_static: false,
            is_native: false,
            is_abstract: true,
            code: None,
        });
        self
    }

    fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        is_static: bool,
        max_locals: usize,
        bytecode: Vec<u8>,
        handlers: Vec<ExceptionHandler>,
    ) {
        self.cf.methods.push(MethodInfo {
            signature: Signature::new(&self.cf.name, descriptor, name),
            visibility: Visibility::Public,
            is_static,
            is_native: false,
            is_abstract: false,
            code: Some(Rc::new(Code {
                max_locals,
                bytecode: bytecode.into(),
                handlers,
            })),
        });
    }

    pub fn build(self) -> ClassFile {
        self.cf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::HierError;

    #[test]
    fn constant_pool_lookup() {
        let mut b = ClassFileBuilder::new("foo/K");
        let i = b.cp(ConstPoolEntry::Int(42));
        let f = b.cp(ConstPoolEntry::FieldRef(Signature::new("foo/K", "I", "c")));
        let cf = b.build();
        assert!(matches!(cf.cp_entry(i), Ok(ConstPoolEntry::Int(42))));
        assert_eq!(cf.field_signature(f).unwrap().name, "c");
        assert!(matches!(cf.field_signature(i), Err(HierError::InvalidIndex(_))));
        assert!(matches!(cf.cp_entry(99), Err(HierError::InvalidIndex(99))));
    }

    #[test]
    fn constant_fields() {
        let cf = ClassFileBuilder::new("foo/K")
            .constant_static_field("C", "I", ConstPoolEntry::Int(42))
            .static_field("f", "I")
            .build();
        let c = Signature::new("foo/K", "I", "C");
        let f = Signature::new("foo/K", "I", "f");
        assert!(cf.is_field_constant(&c).unwrap());
        assert!(!cf.is_field_constant(&f).unwrap());
        assert!(matches!(cf.field_constant_value(&c), Ok(ConstPoolEntry::Int(42))));
        assert!(matches!(
            cf.field_constant_value(&f),
            Err(HierError::AttributeNotFound(_))
        ));
    }

    #[test]
    fn clinit_detection() {
        let cf = ClassFileBuilder::new("foo/K")
            .method(CLINIT_NAME, CLINIT_DESCRIPTOR, true, 0, vec![0xb1])
            .build();
        assert!(cf.clinit().is_some());
        assert!(!cf.has_nonabstract_methods());
    }
}
