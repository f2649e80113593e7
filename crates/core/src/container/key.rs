use std::any::TypeId;
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Raw (unparameterized) type identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawType {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl RawType {
    /// Create a raw type identity for a type
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Short display name without module path segments
    pub fn short_name(&self) -> &'static str {
        self.type_name.rsplit("::").next().unwrap_or(self.type_name)
    }
}

/// Reference to a requested or advertised type.
///
/// A parameterized reference carries explicit type arguments; a wildcard
/// carries one or more upper bounds and only ever appears on the request
/// side of a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Raw(RawType),
    Parameterized { raw: RawType, args: Vec<TypeRef> },
    Wildcard { upper_bounds: Vec<TypeRef> },
}

impl TypeRef {
    /// Create a raw type reference
    pub fn of<T: 'static + ?Sized>() -> Self {
        TypeRef::Raw(RawType::of::<T>())
    }

    /// Create a parameterized type reference
    pub fn parameterized<T: 'static + ?Sized>(args: Vec<TypeRef>) -> Self {
        TypeRef::Parameterized {
            raw: RawType::of::<T>(),
            args,
        }
    }

    /// Create a wildcard type reference with upper bounds
    pub fn wildcard(upper_bounds: Vec<TypeRef>) -> Self {
        TypeRef::Wildcard { upper_bounds }
    }

    /// The raw type this reference names; `None` for wildcards.
    pub fn raw(&self) -> Option<RawType> {
        match self {
            TypeRef::Raw(raw) => Some(*raw),
            TypeRef::Parameterized { raw, .. } => Some(*raw),
            TypeRef::Wildcard { .. } => None,
        }
    }

    /// Whether this reference is a wildcard
    pub fn is_wildcard(&self) -> bool {
        matches!(self, TypeRef::Wildcard { .. })
    }

    /// Whether an advertised reference satisfies a requested one.
    ///
    /// Raw requests match on the raw type alone. Parameterized requests
    /// additionally require matching arguments, where a wildcard argument on
    /// the request side accepts any advertised argument that matches every
    /// upper bound (or anything at all when unbounded).
    pub fn matches_requested(&self, requested: &TypeRef) -> bool {
        match requested {
            TypeRef::Raw(raw) => self.raw() == Some(*raw),
            TypeRef::Parameterized { raw, args } => match self {
                TypeRef::Parameterized {
                    raw: adv_raw,
                    args: adv_args,
                } => {
                    adv_raw == raw
                        && adv_args.len() == args.len()
                        && adv_args
                            .iter()
                            .zip(args.iter())
                            .all(|(adv, req)| adv.matches_requested(req))
                }
                _ => false,
            },
            TypeRef::Wildcard { upper_bounds } => upper_bounds
                .iter()
                .all(|bound| self.matches_requested(bound)),
        }
    }

    /// Human-readable name for diagnostics
    pub fn display_name(&self) -> String {
        match self {
            TypeRef::Raw(raw) => raw.short_name().to_string(),
            TypeRef::Parameterized { raw, args } => {
                let args: Vec<String> = args.iter().map(|a| a.display_name()).collect();
                format!("{}<{}>", raw.short_name(), args.join(", "))
            }
            TypeRef::Wildcard { upper_bounds } => {
                if upper_bounds.is_empty() {
                    "?".to_string()
                } else {
                    let bounds: Vec<String> =
                        upper_bounds.iter().map(|b| b.display_name()).collect();
                    format!("? extends {}", bounds.join(" & "))
                }
            }
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Opaque tag narrowing which candidates satisfy a key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Qualifier(String);

impl Qualifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl From<&str> for Qualifier {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Qualifier {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Dependency identifier: a type reference plus a qualifier set.
///
/// Equality covers both fields. The qualifier set is ordered so display and
/// hashing stay deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub type_ref: TypeRef,
    pub qualifiers: BTreeSet<Qualifier>,
}

impl Key {
    /// Create an unqualified key for a type
    pub fn of<T: 'static + ?Sized>() -> Self {
        Self::new(TypeRef::of::<T>())
    }

    /// Create an unqualified key from a type reference
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            qualifiers: BTreeSet::new(),
        }
    }

    /// Add a qualifier, consuming and returning the key
    pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifiers.insert(qualifier.into());
        self
    }

    /// Replace the qualifier set wholesale
    pub fn with_qualifiers<I, Q>(mut self, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<Qualifier>,
    {
        self.qualifiers = qualifiers.into_iter().map(Into::into).collect();
        self
    }

    /// A copy of this key requesting a different type with the same qualifiers
    pub fn retargeted(&self, type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            qualifiers: self.qualifiers.clone(),
        }
    }

    /// Human-readable name for diagnostics
    pub fn display_name(&self) -> String {
        if self.qualifiers.is_empty() {
            self.type_ref.display_name()
        } else {
            let quals: Vec<String> = self.qualifiers.iter().map(|q| q.to_string()).collect();
            format!("{} {}", self.type_ref.display_name(), quals.join(" "))
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Repository {}
    struct UserRepo;
    struct List;

    #[test]
    fn test_key_equality_covers_both_fields() {
        let plain = Key::of::<UserRepo>();
        let tagged = Key::of::<UserRepo>().qualified("primary");

        assert_ne!(plain, tagged);
        assert_eq!(plain, Key::of::<UserRepo>());
        assert_eq!(
            tagged,
            Key::of::<UserRepo>().qualified(Qualifier::new("primary"))
        );
    }

    #[test]
    fn test_raw_matching_ignores_arguments() {
        let advertised = TypeRef::parameterized::<List>(vec![TypeRef::of::<UserRepo>()]);
        let requested = TypeRef::of::<List>();

        assert!(advertised.matches_requested(&requested));
    }

    #[test]
    fn test_parameterized_matching_compares_arguments() {
        let advertised = TypeRef::parameterized::<List>(vec![TypeRef::of::<UserRepo>()]);
        let same = TypeRef::parameterized::<List>(vec![TypeRef::of::<UserRepo>()]);
        let other = TypeRef::parameterized::<List>(vec![TypeRef::of::<String>()]);

        assert!(advertised.matches_requested(&same));
        assert!(!advertised.matches_requested(&other));
    }

    #[test]
    fn test_wildcard_argument_accepts_bounded_match() {
        let advertised = TypeRef::parameterized::<List>(vec![TypeRef::of::<UserRepo>()]);
        let bounded = TypeRef::parameterized::<List>(vec![TypeRef::wildcard(vec![
            TypeRef::of::<UserRepo>(),
        ])]);
        let unbounded = TypeRef::parameterized::<List>(vec![TypeRef::wildcard(vec![])]);
        let wrong_bound = TypeRef::parameterized::<List>(vec![TypeRef::wildcard(vec![
            TypeRef::of::<String>(),
        ])]);

        assert!(advertised.matches_requested(&bounded));
        assert!(advertised.matches_requested(&unbounded));
        assert!(!advertised.matches_requested(&wrong_bound));
    }

    #[test]
    fn test_display_names() {
        let key = Key::of::<dyn Repository>().qualified("replica");
        let name = key.display_name();
        assert!(name.contains("Repository"));
        assert!(name.contains("@replica"));

        let wild = TypeRef::wildcard(vec![TypeRef::of::<dyn Repository>()]);
        assert!(wild.display_name().starts_with("? extends"));
    }
}
