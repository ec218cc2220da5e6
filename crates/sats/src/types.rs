use crate::value::PhysicalType;
use std::fmt;

/// The semantic type of a column or expression: a physical storage
/// category plus nullability and, optionally, a custom-registered type
/// name (e.g. a domain over `Text` with application-defined meaning).
/// `spec.md` §3 calls this the "logical type", distinct from the physical
/// type a value happens to be stored as.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalType {
    pub physical: PhysicalType,
    pub nullable: bool,
    pub custom_name: Option<String>,
}

impl LogicalType {
    pub fn new(physical: PhysicalType, nullable: bool) -> Self {
        Self {
            physical,
            nullable,
            custom_name: None,
        }
    }

    pub fn not_null(physical: PhysicalType) -> Self {
        Self::new(physical, false)
    }

    pub fn nullable(physical: PhysicalType) -> Self {
        Self::new(physical, true)
    }

    pub fn custom(name: impl Into<String>, physical: PhysicalType, nullable: bool) -> Self {
        Self {
            physical,
            nullable,
            custom_name: Some(name.into()),
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.custom_name {
            Some(name) => write!(f, "{name}")?,
            None => write!(f, "{}", self.physical)?,
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Why a value failed [`crate::compare::validate_against`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MismatchKind {
    #[error("expected type {expected}, found {found}")]
    WrongPhysicalType { expected: PhysicalType, found: PhysicalType },
    #[error("NULL is not allowed for a NOT NULL column")]
    UnexpectedNull,
}
