use thiserror::Error;

pub mod classfile;
pub mod hier;

pub use classfile::{
    ClassFile, ClassFileBuilder, Code, ConstPoolEntry, ExceptionHandler, FieldInfo, MethodInfo,
    Visibility, CLINIT_DESCRIPTOR, CLINIT_NAME,
};
pub use hier::ClassHierarchy;

/// Failure kinds of the class hierarchy oracle.
#[derive(Debug, Error)]
pub enum HierError {
    #[error("class file not found: {0}")]
    ClassFileNotFound(String),
    #[error("field not found: {0}")]
    FieldNotFound(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("field not accessible from {from}: {field}")]
    FieldNotAccessible { from: String, field: String },
    #[error("method not accessible from {from}: {method}")]
    MethodNotAccessible { from: String, method: String },
    #[error("invalid constant pool index {0}")]
    InvalidIndex(u16),
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),
}
