//! Asset identifiers.

use std::fmt;

/// djb2 string hash (`hash * 33 + byte`, seeded with 5381).
pub const fn string_hash(text: &str) -> u64 {
    let bytes = text.as_bytes();
    let mut hash: u64 = 5381;
    let mut i = 0;
    while i < bytes.len() {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(bytes[i] as u64);
        i += 1;
    }
    hash
}

/// A 64-bit asset id, usually the hash of a string id such as a file path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

impl AssetId {
    /// Hash a string id.
    pub const fn from_name(name: &str) -> Self {
        Self(string_hash(name))
    }

    /// The raw hash value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({:016x})", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for AssetId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<&str> for AssetId {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl From<&String> for AssetId {
    fn from(name: &String) -> Self {
        Self::from_name(name)
    }
}

/// An id together with the string it was hashed from, if any.
///
/// The registry keeps the string as the record's debug name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKey {
    pub id: AssetId,
    pub name: Option<String>,
}

impl From<&str> for AssetKey {
    fn from(name: &str) -> Self {
        Self {
            id: AssetId::from_name(name),
            name: Some(name.to_string()),
        }
    }
}

impl From<String> for AssetKey {
    fn from(name: String) -> Self {
        Self {
            id: AssetId::from_name(&name),
            name: Some(name),
        }
    }
}

impl From<&String> for AssetKey {
    fn from(name: &String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<AssetId> for AssetKey {
    fn from(id: AssetId) -> Self {
        Self { id, name: None }
    }
}

impl From<u64> for AssetKey {
    fn from(id: u64) -> Self {
        Self::from(AssetId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_key_keeps_name() {
        let key = AssetKey::from("shaders/default");
        assert_eq!(key.id, AssetId::from_name("shaders/default"));
        assert_eq!(key.name.as_deref(), Some("shaders/default"));

        let key = AssetKey::from(7u64);
        assert_eq!(key.id, AssetId(7));
        assert!(key.name.is_none());
    }

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(string_hash(""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(string_hash("a"), 177_670);
        assert_eq!(string_hash("ab"), 177_670 * 33 + 98);
    }

    #[test]
    fn test_asset_id_from_str() {
        let a: AssetId = "textures/stone.png".into();
        let b = AssetId::from_name("textures/stone.png");
        assert_eq!(a, b);
        assert_ne!(a, AssetId::from("textures/grass.png"));
        assert_eq!(AssetId::from(42u64).value(), 42);
    }
}
