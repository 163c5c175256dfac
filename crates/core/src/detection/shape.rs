//! Shape of names produced by the obfuscator.

use serde::{Deserialize, Serialize};

/// Character-class and length test for obfuscated identifiers. The default accepts 8 to 15
/// uppercase ASCII letters and digits with at least one letter, e.g. `QX7RT2MZKA`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NameShape {
    pub min_len: usize,
    pub max_len: usize,
    pub allow_digits: bool,
    pub require_letter: bool,
}

impl Default for NameShape {
    fn default() -> Self {
        Self {
            min_len: 8,
            max_len: 15,
            allow_digits: true,
            require_letter: true,
        }
    }
}

impl NameShape {
    /// Returns true if `name` looks like an obfuscated identifier.
    pub fn matches(&self, name: &str) -> bool {
        let len = name.chars().count();
        if len < self.min_len || len > self.max_len {
            return false;
        }
        let mut has_letter = false;
        for c in name.chars() {
            if c.is_ascii_uppercase() {
                has_letter = true;
            } else if !(self.allow_digits && c.is_ascii_digit()) {
                return false;
            }
        }
        has_letter || !self.require_letter
    }
}
