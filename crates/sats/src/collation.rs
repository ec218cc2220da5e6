use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A total order on text values. Three are built in (§3); a fourth,
/// caller-registered kind (`Custom`) lets `lucidb-schema`'s
/// `register_collation` (see `SPEC_FULL.md` §2) plug in a comparator
/// without this crate knowing about the schema catalog.
#[derive(Clone)]
pub enum Collation {
    /// Byte-for-byte comparison, the default.
    Binary,
    /// Case-insensitive (ASCII) comparison.
    NoCase,
    /// Binary comparison after trimming trailing whitespace from both
    /// sides.
    RTrim,
    Custom(Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>),
}

impl fmt::Debug for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collation::Binary => write!(f, "Collation::Binary"),
            Collation::NoCase => write!(f, "Collation::NoCase"),
            Collation::RTrim => write!(f, "Collation::RTrim"),
            Collation::Custom(_) => write!(f, "Collation::Custom(..)"),
        }
    }
}

impl Default for Collation {
    fn default() -> Self {
        Collation::Binary
    }
}

impl Collation {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::Binary => a.cmp(b),
            Collation::NoCase => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
            Collation::RTrim => a.trim_end().cmp(b.trim_end()),
            Collation::Custom(f) => f(a, b),
        }
    }

    pub fn custom(f: impl Fn(&str, &str) -> Ordering + Send + Sync + 'static) -> Self {
        Collation::Custom(Arc::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nocase_ignores_ascii_case() {
        assert_eq!(Collation::NoCase.compare("Abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn rtrim_ignores_trailing_whitespace() {
        assert_eq!(Collation::RTrim.compare("abc  ", "abc"), Ordering::Equal);
        assert_eq!(Collation::RTrim.compare("  abc", "abc"), Ordering::Less);
    }

    #[test]
    fn binary_is_byte_exact() {
        assert_ne!(Collation::Binary.compare("Abc", "abc"), Ordering::Equal);
    }
}
