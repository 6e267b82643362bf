use std::collections::HashMap;
use std::rc::Rc;

use crate::bc::classfile::{ClassFile, MethodInfo, Visibility};
use crate::bc::HierError;
use crate::types::{package_of, Signature, TAG_ARRAY};

pub const OBJECT_CLASS: &str = "java/lang/Object";

/// The class hierarchy oracle: read-only lookup, resolution and
/// assignability over a set of in-memory class files.
#[derive(Default)]
pub struct ClassHierarchy {
    classes: HashMap<String, Rc<ClassFile>>,
}

impl ClassHierarchy {
    pub fn new() -> ClassHierarchy {
        ClassHierarchy::default()
    }

    pub fn add_class(&mut self, cf: ClassFile) {
        self.classes.insert(cf.name.clone(), Rc::new(cf));
    }

    pub fn class_file(&self, name: &str) -> Result<&ClassFile, HierError> {
        self.classes
            .get(name)
            .map(|rc| rc.as_ref())
            .ok_or_else(|| HierError::ClassFileNotFound(name.to_owned()))
    }

    /// Resolves a field reference from `current_class`: finds the class that
    /// actually declares the field and checks accessibility. The returned
    /// signature carries the declaring class.
    pub fn resolve_field(
        &self,
        current_class: &str,
        sig: &Signature,
    ) -> Result<Signature, HierError> {
        let (declaring, visibility) = self
            .lookup_field(&sig.class_name, sig)?
            .ok_or_else(|| HierError::FieldNotFound(sig.to_string()))?;
        if !self.member_accessible(current_class, &declaring, visibility) {
            return Err(HierError::FieldNotAccessible {
                from: current_class.to_owned(),
                field: sig.to_string(),
            });
        }
        Ok(Signature::new(&declaring, &sig.descriptor, &sig.name))
    }

    // Search order: the class itself, then its direct superinterfaces
    // recursively, then the superclass chain.
    fn lookup_field(
        &self,
        class: &str,
        sig: &Signature,
    ) -> Result<Option<(String, Visibility)>, HierError> {
        let cf = self.class_file(class)?;
        if let Some(f) = cf.find_field(sig) {
            return Ok(Some((class.to_owned(), f.visibility)));
        }
        for iface in &cf.interfaces {
            if let Some(found) = self.lookup_field(iface, sig)? {
                return Ok(Some(found));
            }
        }
        if let Some(superclass) = cf.superclass.clone() {
            return self.lookup_field(&superclass, sig);
        }
        Ok(None)
    }

    /// Resolves a method reference from `current_class`, checking the
    /// interface flag of the reference against the resolved class.
    pub fn resolve_method(
        &self,
        current_class: &str,
        sig: &Signature,
        is_interface: bool,
    ) -> Result<Signature, HierError> {
        let cf = self.class_file(&sig.class_name)?;
        if cf.is_interface != is_interface {
            return Err(HierError::MethodNotFound(sig.to_string()));
        }
        let (declaring, m) = self
            .lookup_method(&sig.class_name, sig)?
            .ok_or_else(|| HierError::MethodNotFound(sig.to_string()))?;
        if !self.member_accessible(current_class, &declaring, m.visibility) {
            return Err(HierError::MethodNotAccessible {
                from: current_class.to_owned(),
                method: sig.to_string(),
            });
        }
        Ok(Signature::new(&declaring, &sig.descriptor, &sig.name))
    }

    fn lookup_method(
        &self,
        class: &str,
        sig: &Signature,
    ) -> Result<Option<(String, MethodInfo)>, HierError> {
        let cf = self.class_file(class)?;
        if let Some(m) = cf.find_method(sig) {
            return Ok(Some((class.to_owned(), m.clone())));
        }
        if let Some(superclass) = cf.superclass.clone() {
            if let Some(found) = self.lookup_method(&superclass, sig)? {
                return Ok(Some(found));
            }
        }
        for iface in &cf.interfaces {
            if let Some(found) = self.lookup_method(iface, sig)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Selects the implementation a virtual call dispatches to, starting
    /// from the receiver's runtime class and walking up the superclasses.
    pub fn lookup_method_impl(
        &self,
        runtime_class: &str,
        sig: &Signature,
    ) -> Result<Signature, HierError> {
        let mut cur = Some(runtime_class.to_owned());
        while let Some(class) = cur {
            let cf = self.class_file(&class)?;
            if let Some(m) = cf.find_method(sig) {
                if !m.is_abstract {
                    return Ok(Signature::new(&class, &sig.descriptor, &sig.name));
                }
            }
            cur = cf.superclass.clone();
        }
        Err(HierError::MethodNotFound(sig.to_string()))
    }

    fn member_accessible(&self, from: &str, declaring: &str, visibility: Visibility) -> bool {
        match visibility {
            Visibility::Public => true,
            Visibility::Package => package_of(from) == package_of(declaring),
            Visibility::Protected => {
                package_of(from) == package_of(declaring) || self.is_subclass(from, declaring)
            }
            Visibility::Private => from == declaring,
        }
    }

    /// Whether `a` is `b` or a transitive subclass/subinterface of `b`.
    pub fn is_subclass(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        let cf = match self.classes.get(a) {
            Some(cf) => cf,
            None => return false,
        };
        if let Some(superclass) = &cf.superclass {
            if self.is_subclass(superclass, b) {
                return true;
            }
        }
        cf.interfaces.iter().any(|i| self.is_subclass(i, b))
    }

    /// Reference assignability over class names and array descriptors,
    /// with covariant arrays.
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        let from_is_array = from.starts_with(TAG_ARRAY);
        let to_is_array = to.starts_with(TAG_ARRAY);
        match (from_is_array, to_is_array) {
            (true, true) => {
                let (fm, tm) = (&from[1..], &to[1..]);
                if fm == tm {
                    true
                } else {
                    let fm = strip_class_tag(fm);
                    let tm = strip_class_tag(tm);
                    match (fm, tm) {
                        (Some(fm), Some(tm)) => self.is_assignable(fm, tm),
                        _ => false,
                    }
                }
            }
            (true, false) => to == OBJECT_CLASS,
            (false, true) => false,
            (false, false) => self.is_subclass(from, to),
        }
    }

    /// The concrete classes a symbolic reference of the given static type
    /// may expand to, in lexicographic order.
    pub fn compatible_expansions(&self, static_type: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .classes
            .values()
            .filter(|cf| !cf.is_interface && !cf.is_abstract)
            .filter(|cf| self.is_subclass(&cf.name, static_type))
            .map(|cf| cf.name.clone())
            .collect();
        out.sort();
        out
    }

    /// All instance field signatures an object of `class` carries,
    /// including inherited ones, each under its declaring class.
    pub fn instance_field_signatures(&self, class: &str) -> Result<Vec<Signature>, HierError> {
        let mut out = Vec::new();
        let mut cur = Some(class.to_owned());
        while let Some(name) = cur {
            let cf = self.class_file(&name)?;
            for f in cf.fields() {
                if !f.is_static {
                    out.push(f.signature.clone());
                }
            }
            cur = cf.superclass.clone();
        }
        Ok(out)
    }
}

fn strip_class_tag(member: &str) -> Option<&str> {
    if let Some(rest) = member.strip_prefix('L') {
        rest.strip_suffix(';')
    } else if member.starts_with(TAG_ARRAY) {
        Some(member)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::classfile::ClassFileBuilder;
    use crate::bc::HierError;

    fn hier() -> ClassHierarchy {
        let mut h = ClassHierarchy::new();
        h.add_class(ClassFileBuilder::new(OBJECT_CLASS).no_superclass().build());
        h.add_class(
            ClassFileBuilder::new("pkg/Base")
                .field("x", "I")
                .field_with_visibility("hidden", "I", Visibility::Private, false)
                .method("m", "()V", false, 1, vec![0xb1])
                .build(),
        );
        h.add_class(ClassFileBuilder::new("pkg/Mid").superclass("pkg/Base").build());
        h.add_class(
            ClassFileBuilder::new("pkg/Leaf")
                .superclass("pkg/Mid")
                .method("m", "()V", false, 1, vec![0xb1])
                .build(),
        );
        h.add_class(
            ClassFileBuilder::new("pkg/Iface")
                .interface()
                .abstract_method("n", "()V")
                .build(),
        );
        h
    }

    #[test]
    fn field_resolution_walks_superclasses() {
        let h = hier();
        let sig = Signature::new("pkg/Leaf", "I", "x");
        let resolved = h.resolve_field("pkg/Leaf", &sig).unwrap();
        assert_eq!(resolved.class_name, "pkg/Base");
        let missing = Signature::new("pkg/Leaf", "I", "nope");
        assert!(matches!(
            h.resolve_field("pkg/Leaf", &missing),
            Err(HierError::FieldNotFound(_))
        ));
    }

    #[test]
    fn private_fields_are_inaccessible_from_subclasses() {
        let h = hier();
        let sig = Signature::new("pkg/Base", "I", "hidden");
        assert!(h.resolve_field("pkg/Base", &sig).is_ok());
        assert!(matches!(
            h.resolve_field("other/K", &sig),
            Err(HierError::FieldNotAccessible { .. })
        ));
    }

    #[test]
    fn virtual_dispatch_picks_the_most_derived_impl() {
        let h = hier();
        let sig = Signature::new("pkg/Base", "()V", "m");
        let on_leaf = h.lookup_method_impl("pkg/Leaf", &sig).unwrap();
        assert_eq!(on_leaf.class_name, "pkg/Leaf");
        let on_mid = h.lookup_method_impl("pkg/Mid", &sig).unwrap();
        assert_eq!(on_mid.class_name, "pkg/Base");
    }

    #[test]
    fn subclassing_and_assignability() {
        let h = hier();
        assert!(h.is_subclass("pkg/Leaf", "pkg/Base"));
        assert!(h.is_subclass("pkg/Leaf", OBJECT_CLASS));
        assert!(!h.is_subclass("pkg/Base", "pkg/Leaf"));
        assert!(h.is_assignable("[Lpkg/Leaf;", "[Lpkg/Base;"));
        assert!(h.is_assignable("[I", OBJECT_CLASS));
        assert!(!h.is_assignable("[I", "[J"));
    }

    #[test]
    fn expansions_are_concrete_and_sorted() {
        let h = hier();
        let exp = h.compatible_expansions("pkg/Base");
        assert_eq!(exp, vec!["pkg/Base", "pkg/Leaf", "pkg/Mid"]);
        assert!(h.compatible_expansions("pkg/Iface").is_empty());
    }
}
