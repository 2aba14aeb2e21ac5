use std::fmt;

use serde::{Deserialize, Serialize};

/// Target-shape hint used when decoding an agent payload into a host value
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    List(Box<Shape>),
    Map(Box<Shape>),
    Opaque,
    Nullable(Box<Shape>),
}

impl Shape {
    pub fn list_of(inner: Shape) -> Self {
        Shape::List(Box::new(inner))
    }

    pub fn map_of(inner: Shape) -> Self {
        Shape::Map(Box::new(inner))
    }

    pub fn nullable(inner: Shape) -> Self {
        Shape::Nullable(Box::new(inner))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Any => f.write_str("any"),
            Shape::Null => f.write_str("null"),
            Shape::Bool => f.write_str("bool"),
            Shape::Int => f.write_str("int"),
            Shape::Float => f.write_str("float"),
            Shape::Str => f.write_str("str"),
            Shape::List(inner) => write!(f, "list<{inner}>"),
            Shape::Map(inner) => write!(f, "map<{inner}>"),
            Shape::Opaque => f.write_str("opaque"),
            Shape::Nullable(inner) => write!(f, "{inner}?"),
        }
    }
}
