use std::fmt;

use serde::{Deserialize, Serialize};

/// Descriptor for a host-side parameter or return type.
///
/// The bridge never inspects live host types; every decision goes through
/// the capability predicates below plus a [`TypeHierarchy`] built from the
/// classes and interfaces registered at bridge setup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostType {
    /// Fully generic parameter: accepts anything.
    Any,
    Void,
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Array { element: Box<HostType> },
    Collection,
    Map,
    Interface { name: String },
    Class { name: String },
}

pub trait TypeHierarchy {
    /// True when `sub` names the same type as `sup` or one of its registered subtypes.
    fn is_subtype(&self, sub: &str, sup: &str) -> bool;
}

/// Hierarchy with no registered relationships besides identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatHierarchy;

impl TypeHierarchy for FlatHierarchy {
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        sub == sup
    }
}

impl HostType {
    pub fn array_of(element: HostType) -> Self {
        Self::Array {
            element: Box::new(element),
        }
    }

    pub fn interface(name: impl Into<String>) -> Self {
        Self::Interface { name: name.into() }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Self::Class { name: name.into() }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Any)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection)
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map)
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, Self::Interface { .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::Byte
                | Self::Short
                | Self::Int
                | Self::Long
                | Self::Float
                | Self::Double
        )
    }

    pub fn is_primitive_numeric(&self) -> bool {
        matches!(
            self,
            Self::Byte | Self::Short | Self::Int | Self::Long | Self::Float | Self::Double
        )
    }

    pub fn element_type(&self) -> Option<&HostType> {
        match self {
            Self::Array { element } => Some(element),
            _ => None,
        }
    }

    /// Number of nested array levels.
    pub fn dimensions(&self) -> usize {
        match self {
            Self::Array { element } => 1 + element.dimensions(),
            _ => 0,
        }
    }

    pub fn is_assignable_from(&self, other: &HostType, hierarchy: &dyn TypeHierarchy) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Self::Any, other) => !other.is_void(),
            (Self::Array { element }, Self::Array { element: other }) => {
                element.is_assignable_from(other, hierarchy)
            }
            (Self::Class { name }, Self::Class { name: other })
            | (Self::Interface { name }, Self::Class { name: other })
            | (Self::Interface { name }, Self::Interface { name: other }) => {
                hierarchy.is_subtype(other, name)
            }
            _ => false,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Void => write!(f, "void"),
            Self::Boolean => write!(f, "boolean"),
            Self::Char => write!(f, "char"),
            Self::Byte => write!(f, "byte"),
            Self::Short => write!(f, "short"),
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Array { element } => write!(f, "{}[]", element),
            Self::Collection => write!(f, "collection"),
            Self::Map => write!(f, "map"),
            Self::Interface { name } | Self::Class { name } => write!(f, "{}", name),
        }
    }
}
