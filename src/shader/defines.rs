//! Shader define sets.
//!
//! A [`ShaderDefines`] is kept sorted by name so two sets holding the same
//! definitions compare, order and hash identically no matter in which order
//! the definitions were added. That makes it usable as part of a cache key.

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hash};

/// An ordered collection of `NAME -> VALUE` definitions.
///
/// Boolean switches are stored with the value `"1"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaderDefines {
    defines: Vec<(String, String)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a valued definition.
    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(idx) => self.defines[idx].1 = value,
            Err(idx) => self.defines.insert(idx, (key.to_owned(), value)),
        }
    }

    /// Inserts a boolean switch.
    #[inline]
    pub fn set_flag(&mut self, key: &str) {
        self.set(key, "1");
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Builder form of [`set_flag`](Self::set_flag).
    #[must_use]
    pub fn with_flag(mut self, key: &str) -> Self {
        self.set_flag(key);
        self
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.defines.binary_search_by(|(k, _)| k.as_str().cmp(key)) {
            Ok(idx) => {
                self.defines.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copies every definition of `other`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for (key, value) in &other.defines {
            self.set(key, value);
        }
    }

    /// Template context: every definition is visible by name.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.defines.iter().cloned().collect()
    }

    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(defines: &[(&str, &str)]) -> Self {
        let mut result = Self::new();
        for (key, value) in defines {
            result.set(key, value);
        }
        result
    }
}

impl<K: AsRef<str>, V: ToString> FromIterator<(K, V)> for ShaderDefines {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (key, value) in iter {
            result.set(key.as_ref(), value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_does_not_matter() {
        let mut a = ShaderDefines::new();
        a.set_flag("ENABLE_NORMAL_MAPPING");
        a.set("MATERIAL_PROPERTY_COUNT", 2);

        let mut b = ShaderDefines::new();
        b.set("MATERIAL_PROPERTY_COUNT", 2);
        b.set_flag("ENABLE_NORMAL_MAPPING");

        assert_eq!(a, b);
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn set_overwrites_and_remove_deletes() {
        let mut defines = ShaderDefines::new().with("MAX_BONES", 64);
        defines.set("MAX_BONES", 128);
        assert_eq!(defines.get("MAX_BONES"), Some("128"));
        assert_eq!(defines.len(), 1);

        assert!(defines.remove("MAX_BONES"));
        assert!(!defines.remove("MAX_BONES"));
        assert!(defines.is_empty());
    }

    #[test]
    fn merge_prefers_other() {
        let mut base = ShaderDefines::new().with("A", 1).with("B", 1);
        let over = ShaderDefines::new().with("B", 2).with("C", 3);
        base.merge(&over);

        let collected: Vec<_> = base.iter().collect();
        assert_eq!(collected, vec![("A", "1"), ("B", "2"), ("C", "3")]);
    }
}
