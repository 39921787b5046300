//! The static type system shared by the AST and the SSA IR (spec §3.1).
//!
//! A single [`Type`] enum serves both layers: the AST and the IR value
//! model consume the same acceptance/cast/deref rules. Types are built out
//! of `Rc`-wrapped recursive pieces so `Type::clone()` stays O(1) (the "value
//! semantics; types are interned or cheaply cloned" requirement of §3.1).

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Width, in bits, of an integer primitive. MimiC supports 8-bit and 32-bit
/// integers only (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    W8,
    W32,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W32 => 32,
        }
    }

    pub fn bytes(self) -> u32 {
        self.bits() / 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

/// A nominal struct definition. Shared via `Rc` so every `Type::Struct`
/// referring to the same declaration points at one definition.
#[derive(Debug, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<StructField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub ret: Box<Type>,
}

/// The static type of an AST expression or an IR value.
///
/// `Const` and `RightValue` are value-category qualifiers layered as
/// wrappers rather than flags, so `Const(RightValue(T))` and
/// `RightValue(Const(T))` are both expressible (the rules in §3.1 only ever
/// need to unwrap one layer at a time).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Void,
    Int(IntWidth, /* signed */ bool),
    Pointer(Box<Type>),
    Array(Box<Type>, usize),
    Struct(Rc<StructDef>),
    Function(Rc<FunctionSig>),
    Const(Box<Type>),
    RightValue(Box<Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(IntWidth::W8, true) => write!(f, "i8"),
            Type::Int(IntWidth::W8, false) => write!(f, "u8"),
            Type::Int(IntWidth::W32, true) => write!(f, "i32"),
            Type::Int(IntWidth::W32, false) => write!(f, "u32"),
            Type::Pointer(t) => write!(f, "{}*", t),
            Type::Array(t, n) => write!(f, "{}[{}]", t, n),
            Type::Struct(s) => write!(f, "struct {}", s.name),
            Type::Function(sig) => {
                write!(f, "(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", sig.ret)
            }
            Type::Const(t) => write!(f, "const {}", t),
            Type::RightValue(t) => write!(f, "rvalue {}", t),
        }
    }
}

impl Type {
    pub fn i32_ty() -> Type {
        Type::Int(IntWidth::W32, true)
    }

    pub fn u32_ty() -> Type {
        Type::Int(IntWidth::W32, false)
    }

    pub fn i8_ty() -> Type {
        Type::Int(IntWidth::W8, true)
    }

    pub fn u8_ty() -> Type {
        Type::Int(IntWidth::W8, false)
    }

    pub fn ptr(inner: Type) -> Type {
        Type::Pointer(Box::new(inner))
    }

    /// Strip `Const`/`RightValue` qualifier wrappers, returning the bare
    /// structural type underneath.
    pub fn unqualified(&self) -> &Type {
        match self {
            Type::Const(t) | Type::RightValue(t) => t.unqualified(),
            other => other,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Type::Const(_))
    }

    pub fn is_rvalue(&self) -> bool {
        matches!(self, Type::RightValue(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.unqualified(), Type::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.unqualified(), Type::Int(..))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.unqualified(), Type::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.unqualified(), Type::Array(..))
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.unqualified(), Type::Int(_, true))
    }

    /// Byte size on the target (§3.1: widths {8,32}, pointers are 4 bytes on
    /// the 32-bit ARM-like target).
    pub fn size(&self) -> u32 {
        match self.unqualified() {
            Type::Void => 0,
            Type::Int(w, _) => w.bytes(),
            Type::Pointer(_) => 4,
            Type::Array(elem, n) => elem.size() * (*n as u32),
            Type::Struct(s) => s.fields.iter().map(|f| f.ty.size()).sum(),
            Type::Function(_) => 4,
            Type::Const(t) | Type::RightValue(t) => t.size(),
        }
    }

    pub fn align(&self) -> u32 {
        match self.unqualified() {
            Type::Void => 1,
            Type::Int(w, _) => w.bytes().max(1),
            Type::Pointer(_) => 4,
            Type::Array(elem, _) => elem.align(),
            Type::Struct(s) => s.fields.iter().map(|f| f.ty.align()).max().unwrap_or(1),
            Type::Function(_) => 4,
            Type::Const(t) | Type::RightValue(t) => t.align(),
        }
    }

    /// "Array and const types require structural identity for initialization" (§3.1).
    pub fn is_identical(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Void, Type::Void) => true,
            (Type::Int(w1, s1), Type::Int(w2, s2)) => w1 == w2 && s1 == s2,
            (Type::Pointer(a), Type::Pointer(b)) => a.is_identical(b),
            (Type::Array(a, n1), Type::Array(b, n2)) => n1 == n2 && a.is_identical(b),
            (Type::Struct(a), Type::Struct(b)) => Rc::ptr_eq(a, b) || a.name == b.name,
            (Type::Function(a), Type::Function(b)) => {
                a.params.len() == b.params.len()
                    && a.params.iter().zip(&b.params).all(|(x, y)| x.is_identical(y))
                    && a.ret.is_identical(&b.ret)
            }
            (Type::Const(a), Type::Const(b)) => a.is_identical(b),
            (Type::RightValue(a), Type::RightValue(b)) => a.is_identical(b),
            _ => false,
        }
    }

    /// Decay an array parameter type to a pointer, per §3.1: "Array(T, n)...
    /// decays to Pointer(T) when passed as a parameter."
    pub fn decay_for_param(&self) -> Type {
        match self.unqualified() {
            Type::Array(elem, _) => Type::Pointer(elem.clone()),
            other => other.clone(),
        }
    }

    /// The "can-accept" (implicit-convert) relation: can a value of type
    /// `other` be used where `self` is expected? Array/const pairs instead
    /// require [`Type::is_identical`] for initialization per §3.1.
    pub fn can_accept(&self, other: &Type) -> bool {
        let (a, b) = (self.unqualified(), other.unqualified());
        match (a, b) {
            (Type::Void, Type::Void) => true,
            (Type::Int(..), Type::Int(..)) => true,
            (Type::Pointer(p1), Type::Pointer(p2)) => {
                p1.unqualified().is_identical(p2.unqualified()) || matches!(**p1, Type::Void) || matches!(**p2, Type::Void)
            }
            (Type::Pointer(_), Type::Int(..)) | (Type::Int(..), Type::Pointer(_)) => true,
            (Type::Array(..), Type::Array(..)) => a.is_identical(b),
            (Type::Struct(_), Type::Struct(_)) => a.is_identical(b),
            (Type::Function(_), Type::Function(_)) => a.is_identical(b),
            _ => false,
        }
    }

    /// Can `self` be explicitly cast to `target`? Strictly wider than
    /// `can_accept`: any two scalar (integer/pointer) types may be cast.
    pub fn can_cast_to(&self, target: &Type) -> bool {
        let (a, b) = (self.unqualified(), target.unqualified());
        matches!(
            (a, b),
            (Type::Int(..), Type::Int(..))
                | (Type::Int(..), Type::Pointer(_))
                | (Type::Pointer(_), Type::Int(..))
                | (Type::Pointer(_), Type::Pointer(_))
        )
    }

    /// Is `self` assignable-to? "A right-value is assignable-from-compatible;
    /// a const left-value is not assignable-to" (§3.1).
    pub fn is_assignable_to(&self) -> bool {
        !matches!(self, Type::Const(_)) && !matches!(self, Type::RightValue(_))
    }

    pub fn is_assignable_from(&self, value: &Type) -> bool {
        if !self.is_assignable_to() {
            return false;
        }
        self.can_accept(value)
    }

    /// Dereference a pointer type, yielding the pointee.
    pub fn deref(&self) -> Option<Type> {
        match self.unqualified() {
            Type::Pointer(inner) => Some((**inner).clone()),
            _ => None,
        }
    }

    /// Element type reached by indexing an array or pointer.
    pub fn element_type(&self) -> Option<Type> {
        match self.unqualified() {
            Type::Array(inner, _) => Some((**inner).clone()),
            Type::Pointer(inner) => Some((**inner).clone()),
            _ => None,
        }
    }

    /// Byte offset of field `idx` within a struct, laid out sequentially
    /// with no inter-field padding (selection (C6) uses this for constant
    /// field-index `Gep`s).
    pub fn field_offset(&self, idx: usize) -> u32 {
        match self.unqualified() {
            Type::Struct(def) => def.fields[..idx].iter().map(|f| f.ty.size()).sum(),
            _ => panic!("field_offset on non-struct type"),
        }
    }

    /// Field lookup by name on a struct type.
    pub fn field(&self, name: &str) -> Option<(usize, Type)> {
        match self.unqualified() {
            Type::Struct(def) => def
                .fields
                .iter()
                .enumerate()
                .find(|(_, f)| f.name == name)
                .map(|(i, f)| (i, f.ty.clone())),
            _ => None,
        }
    }

    /// Convert to the right-value category (reading a value out of an
    /// lvalue strips `Const` but adds `RightValue`).
    pub fn to_rvalue(&self) -> Type {
        match self {
            Type::RightValue(_) => self.clone(),
            Type::Const(inner) => Type::RightValue(inner.clone()),
            other => Type::RightValue(Box::new(other.clone())),
        }
    }

    /// Convert to the left-value category (strips `RightValue`, keeps `Const`).
    pub fn to_lvalue(&self) -> Type {
        match self {
            Type::RightValue(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// The common type of two operands under MimiC's implicit numeric
    /// promotion rules: widen to the wider width; if widths match and
    /// signedness differs, the result is unsigned (C-like usual arithmetic
    /// conversions, restricted to the two supported integer widths).
    pub fn common_numeric_type(&self, other: &Type) -> Option<Type> {
        let (a, b) = (self.unqualified(), other.unqualified());
        match (a, b) {
            (Type::Pointer(_), Type::Int(..)) => Some(a.clone()),
            (Type::Int(..), Type::Pointer(_)) => Some(b.clone()),
            (Type::Pointer(_), Type::Pointer(_)) => Some(a.clone()),
            (Type::Int(w1, s1), Type::Int(w2, s2)) => {
                let w = (*w1).max(*w2);
                let signed = if w1 == w2 { *s1 && *s2 } else if w1 > w2 { *s1 } else { *s2 };
                Some(Type::Int(w, signed))
            }
            _ => None,
        }
    }
}

/// Registry of named struct declarations, used during semantic analysis to
/// resolve `struct Foo` references to the one `Rc<StructDef>` for `Foo`.
#[derive(Default)]
pub struct StructRegistry {
    structs: HashMap<String, Rc<StructDef>>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, def: StructDef) -> Rc<StructDef> {
        let rc = Rc::new(def);
        self.structs.insert(rc.name.clone(), rc.clone());
        rc
    }

    pub fn get(&self, name: &str) -> Option<Rc<StructDef>> {
        self.structs.get(name).cloned()
    }

    /// Resolve §9's open question on struct recursion: build the nominal
    /// struct-embeds-struct graph (pointers break cycles, so a pointer field
    /// never becomes a graph edge) and run a full DFS cycle search, rather
    /// than the source's shallow "same as immediately enclosing struct"
    /// check.
    pub fn check_no_recursive_structs(&self) -> Result<(), String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let names: Vec<&String> = self.structs.keys().collect();
        let mut marks: HashMap<&str, Mark> =
            names.iter().map(|n| (n.as_str(), Mark::Unvisited)).collect();

        fn embedded_struct_names(def: &StructDef) -> Vec<&str> {
            def.fields
                .iter()
                .filter_map(|f| match &f.ty {
                    Type::Struct(s) => Some(s.name.as_str()),
                    Type::Array(elem, _) => match elem.as_ref() {
                        Type::Struct(s) => Some(s.name.as_str()),
                        _ => None,
                    },
                    _ => None,
                })
                .collect()
        }

        fn visit<'a>(
            name: &'a str,
            registry: &'a StructRegistry,
            marks: &mut HashMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Result<(), String> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    stack.push(name);
                    return Err(format!(
                        "recursive struct definition: {}",
                        stack.join(" -> ")
                    ));
                }
                _ => {}
            }
            marks.insert(name, Mark::InProgress);
            stack.push(name);
            if let Some(def) = registry.structs.get(name) {
                for child in embedded_struct_names(def) {
                    visit(child, registry, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in names {
            let mut stack = Vec::new();
            visit(name.as_str(), self, &mut marks, &mut stack)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn make_struct(name: &str, fields: Vec<(&str, Type)>) -> StructDef {
        StructDef {
            name: name.to_string(),
            fields: fields.into_iter().map(|(n, ty)| StructField { name: n.to_string(), ty }).collect(),
        }
    }

    #[rstest]
    #[case(Type::i32_ty(), Type::i32_ty(), true)]
    #[case(Type::i32_ty(), Type::u8_ty(), true)]
    #[case(Type::ptr(Type::i32_ty()), Type::i32_ty(), true)]
    #[case(Type::ptr(Type::i32_ty()), Type::ptr(Type::u8_ty()), false)]
    fn can_accept_matches_table(#[case] dst: Type, #[case] src: Type, #[case] expect: bool) {
        assert_eq!(dst.can_accept(&src), expect);
    }

    #[test]
    fn const_lvalue_is_not_assignable_to() {
        let t = Type::Const(Box::new(Type::i32_ty()));
        assert!(!t.is_assignable_to());
    }

    #[test]
    fn rvalue_is_assignable_from_compatible() {
        let t = Type::RightValue(Box::new(Type::i32_ty()));
        assert!(t.is_assignable_from(&Type::i32_ty()));
    }

    #[test]
    fn array_decays_to_pointer_for_params() {
        let arr = Type::Array(Box::new(Type::i32_ty()), 4);
        assert_eq!(arr.decay_for_param(), Type::ptr(Type::i32_ty()));
    }

    #[test]
    fn array_initialization_requires_structural_identity_not_just_accept() {
        let a = Type::Array(Box::new(Type::i32_ty()), 4);
        let b = Type::Array(Box::new(Type::i32_ty()), 5);
        assert!(!a.is_identical(&b));
        assert!(!a.can_accept(&b));
    }

    #[test]
    fn direct_self_recursion_is_rejected() {
        let mut reg = StructRegistry::new();
        // struct Node { struct Node inner; } -- no pointer indirection.
        let node_rc = reg.declare(make_struct("Node", vec![]));
        let _ = node_rc;
        let bad = make_struct("Node", vec![("inner", Type::Struct(reg.get("Node").unwrap()))]);
        reg.declare(bad);
        assert!(reg.check_no_recursive_structs().is_err());
    }

    #[test]
    fn recursion_through_pointer_is_allowed() {
        let mut reg = StructRegistry::new();
        reg.declare(make_struct("Node", vec![]));
        let self_ptr = make_struct(
            "Node",
            vec![("next", Type::Pointer(Box::new(Type::Struct(reg.get("Node").unwrap()))))],
        );
        reg.declare(self_ptr);
        assert!(reg.check_no_recursive_structs().is_ok());
    }

    #[test]
    fn deep_cycle_through_intermediate_struct_is_detected() {
        // struct A { struct B b; } struct B { struct A a; }
        // The source's shallow check (only looks at the immediately
        // enclosing struct) misses this; the nominal-type-graph DFS must not.
        let mut reg = StructRegistry::new();
        reg.declare(make_struct("A", vec![]));
        reg.declare(make_struct("B", vec![("a", Type::Struct(reg.get("A").unwrap()))]));
        let a_with_b = make_struct("A", vec![("b", Type::Struct(reg.get("B").unwrap()))]);
        reg.declare(a_with_b);
        assert!(reg.check_no_recursive_structs().is_err());
    }
}
