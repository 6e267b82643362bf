use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag character for a class-reference descriptor (`Lfoo/Bar;`).
pub const TAG_REFERENCE: char = 'L';
/// Tag character for an array descriptor (`[I`, `[Lfoo/Bar;`).
pub const TAG_ARRAY: char = '[';
/// Tag character for the null-reference pseudo type.
pub const TAG_NULLREF: char = 'N';

/// The primitive types of the hosted VM, one per tag character in
/// `{B, C, D, F, I, J, S, Z, V}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimitiveType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Void,
}

impl PrimitiveType {
    pub fn as_char(self) -> char {
        match self {
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Double => 'D',
            PrimitiveType::Float => 'F',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Short => 'S',
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Void => 'V',
        }
    }

    pub fn from_char(c: char) -> Option<PrimitiveType> {
        match c {
            'B' => Some(PrimitiveType::Byte),
            'C' => Some(PrimitiveType::Char),
            'D' => Some(PrimitiveType::Double),
            'F' => Some(PrimitiveType::Float),
            'I' => Some(PrimitiveType::Int),
            'J' => Some(PrimitiveType::Long),
            'S' => Some(PrimitiveType::Short),
            'Z' => Some(PrimitiveType::Boolean),
            'V' => Some(PrimitiveType::Void),
            _ => None,
        }
    }

    /// True for the types that may appear in a value (everything but `V`).
    pub fn is_value_type(self) -> bool {
        self != PrimitiveType::Void
    }

    /// True for the numeric types that survive unary promotion, i.e. the
    /// operand types of binary arithmetic.
    pub fn is_promoted(self) -> bool {
        matches!(
            self,
            PrimitiveType::Int | PrimitiveType::Long | PrimitiveType::Float | PrimitiveType::Double
        )
    }

    /// True for the integral "small" types that promote to `Int` before
    /// arithmetic.
    pub fn promotes_to_int(self) -> bool {
        matches!(
            self,
            PrimitiveType::Byte | PrimitiveType::Short | PrimitiveType::Char | PrimitiveType::Boolean
        )
    }

    /// The type of this value after unary promotion.
    pub fn promoted(self) -> PrimitiveType {
        if self.promotes_to_int() {
            PrimitiveType::Int
        } else {
            self
        }
    }

    /// Category-2 types occupy two local slots and obey the wide stack rules.
    pub fn is_category2(self) -> bool {
        matches!(self, PrimitiveType::Long | PrimitiveType::Double)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Whether a value of type `from` may be widened to type `to`.
///
/// `Boolean -> Int` is admitted as a modeled promotion: the hosted VM keeps
/// booleans as ints on the operand stack, and loads of boolean fields widen.
pub fn widens(to: PrimitiveType, from: PrimitiveType) -> bool {
    use PrimitiveType::*;
    match from {
        Byte => matches!(to, Short | Int | Long | Float | Double),
        Short | Char => matches!(to, Int | Long | Float | Double),
        Boolean => to == Int,
        Int => matches!(to, Long | Float | Double),
        Long => matches!(to, Float | Double),
        Float => to == Double,
        Double | Void => false,
    }
}

/// Whether a value of type `from` may be narrowed to type `to`.
pub fn narrows(to: PrimitiveType, from: PrimitiveType) -> bool {
    widens(from, to)
}

/// A field or method signature: the ordered triple
/// `(class name, descriptor, member name)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Signature {
    pub class_name: String,
    pub descriptor: String,
    pub name: String,
}

impl Signature {
    pub fn new(class_name: &str, descriptor: &str, name: &str) -> Signature {
        Signature {
            class_name: class_name.to_owned(),
            descriptor: descriptor.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class_name, self.descriptor, self.name)
    }
}

/// A parsed type descriptor.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeDesc {
    Primitive(PrimitiveType),
    Class(String),
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    pub fn is_reference(&self) -> bool {
        !matches!(self, TypeDesc::Primitive(_))
    }

    /// The descriptor string this was parsed from.
    pub fn descriptor(&self) -> String {
        match self {
            TypeDesc::Primitive(t) => t.as_char().to_string(),
            TypeDesc::Class(name) => format!("L{};", name),
            TypeDesc::Array(member) => format!("[{}", member.descriptor()),
        }
    }

    /// For a class or array type, the runtime class name (`foo/Bar` or the
    /// whole array descriptor `[I`).
    pub fn class_name(&self) -> Option<String> {
        match self {
            TypeDesc::Primitive(_) => None,
            TypeDesc::Class(name) => Some(name.clone()),
            TypeDesc::Array(_) => Some(self.descriptor()),
        }
    }
}

/// Parses a single field descriptor.
pub fn parse_type(descriptor: &str) -> Option<TypeDesc> {
    let (t, rest) = parse_type_prefix(descriptor)?;
    if rest.is_empty() {
        Some(t)
    } else {
        None
    }
}

fn parse_type_prefix(s: &str) -> Option<(TypeDesc, &str)> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if let Some(p) = PrimitiveType::from_char(c) {
        if p == PrimitiveType::Void {
            return None;
        }
        return Some((TypeDesc::Primitive(p), chars.as_str()));
    }
    match c {
        TAG_REFERENCE => {
            let rest = chars.as_str();
            let semi = rest.find(';')?;
            Some((TypeDesc::Class(rest[..semi].to_owned()), &rest[semi + 1..]))
        }
        TAG_ARRAY => {
            let (member, rest) = parse_type_prefix(chars.as_str())?;
            Some((TypeDesc::Array(Box::new(member)), rest))
        }
        _ => None,
    }
}

/// Splits a method descriptor `(...)R` into parameter types and return type.
/// The return type is `None` for `void`.
pub fn parse_method_descriptor(descriptor: &str) -> Option<(Vec<TypeDesc>, Option<TypeDesc>)> {
    let rest = descriptor.strip_prefix('(')?;
    let close = rest.find(')')?;
    let (mut params_str, ret_str) = (&rest[..close], &rest[close + 1..]);
    let mut params = Vec::new();
    while !params_str.is_empty() {
        let (t, tail) = parse_type_prefix(params_str)?;
        params.push(t);
        params_str = tail;
    }
    let ret = if ret_str == "V" {
        None
    } else {
        Some(parse_type(ret_str)?)
    };
    Some((params, ret))
}

/// Number of local-variable slots taken by a parameter list; category-2
/// types take two slots each.
pub fn param_slots(params: &[TypeDesc]) -> usize {
    params
        .iter()
        .map(|t| match t {
            TypeDesc::Primitive(p) if p.is_category2() => 2,
            _ => 1,
        })
        .sum()
}

/// Package of a class name, i.e. everything up to the last `/`.
pub fn package_of(class_name: &str) -> &str {
    match class_name.rfind('/') {
        Some(i) => &class_name[..i],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for c in ['B', 'C', 'D', 'F', 'I', 'J', 'S', 'Z', 'V'] {
            assert_eq!(PrimitiveType::from_char(c).unwrap().as_char(), c);
        }
        assert!(PrimitiveType::from_char('L').is_none());
    }

    #[test]
    fn widening_table() {
        use PrimitiveType::*;
        assert!(widens(Int, Byte));
        assert!(widens(Double, Float));
        assert!(widens(Int, Char));
        assert!(!widens(Byte, Int));
        assert!(!widens(Int, Int));
        assert!(narrows(Byte, Int));
        assert!(narrows(Float, Double));
        assert!(!narrows(Long, Int));
    }

    #[test]
    fn parse_field_descriptors() {
        assert_eq!(parse_type("I"), Some(TypeDesc::Primitive(PrimitiveType::Int)));
        assert_eq!(
            parse_type("Ljava/lang/Object;"),
            Some(TypeDesc::Class("java/lang/Object".to_owned()))
        );
        let arr = parse_type("[[J").unwrap();
        assert_eq!(arr.descriptor(), "[[J");
        assert!(parse_type("Lunterminated").is_none());
        assert!(parse_type("II").is_none());
    }

    #[test]
    fn parse_method_descriptors() {
        let (params, ret) = parse_method_descriptor("(I[JLfoo/Bar;)V").unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].descriptor(), "[J");
        assert!(ret.is_none());
        let (params, ret) = parse_method_descriptor("()Lfoo/Baz;").unwrap();
        assert!(params.is_empty());
        assert_eq!(ret.unwrap().class_name().unwrap(), "foo/Baz");
        assert_eq!(param_slots(&parse_method_descriptor("(JID)V").unwrap().0), 5);
    }

    #[test]
    fn packages() {
        assert_eq!(package_of("java/lang/Object"), "java/lang");
        assert_eq!(package_of("TopLevel"), "");
    }
}
