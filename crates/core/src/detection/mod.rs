//! Content-based detection inside method bodies: instruction predicates, the ordered matcher and
//! the obfuscated-name shape.

pub mod matcher;
pub mod predicate;
pub mod shape;

pub use matcher::{MatchMode, MatchResult, Matcher, MatcherConfig};
pub use predicate::{InstrPredicate, OpClass, OperandConstraint};
pub use shape::NameShape;
