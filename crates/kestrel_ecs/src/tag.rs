//! # Tags
//!
//! Opaque markers attached to entities. Tags carry no payload and live in a
//! namespace separate from component types; they only exist to be matched by
//! query predicates.

use std::borrow::Cow;
use std::fmt;

/// An opaque entity marker: a small integer or a string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    /// Integer tag.
    Int(i64),
    /// String tag.
    Str(Cow<'static, str>),
}

impl From<i64> for Tag {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Tag {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&'static str> for Tag {
    fn from(value: &'static str) -> Self {
        Self::Str(Cow::Borrowed(value))
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self::Str(Cow::Owned(value))
    }
}

impl From<&Tag> for Tag {
    fn from(value: &Tag) -> Self {
        value.clone()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "#{value}"),
            Self::Str(value) => write!(f, "'{value}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_and_borrowed_strings_are_equal() {
        assert_eq!(Tag::from("enemy"), Tag::from(String::from("enemy")));
    }

    #[test]
    fn test_integer_widths_collapse() {
        assert_eq!(Tag::from(7_i32), Tag::from(7_i64));
        assert_eq!(Tag::from(7_u32), Tag::Int(7));
        assert_ne!(Tag::from(7_i64), Tag::from("7"));
    }
}
