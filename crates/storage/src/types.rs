//! Identifier newtypes shared across storage and exchange layers.

/// Defines a newtype wrapper around `i64` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `i64`
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<i64>`, `Into<i64>` and `Display`
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Realm (tenant) that owns an authorized app or a verification code.
    ///
    /// # Examples
    ///
    /// ```
    /// use enverify_storage::RealmId;
    ///
    /// let realm = RealmId::from(7);
    /// assert_eq!(i64::from(realm), 7);
    /// assert_eq!(realm.to_string(), "7");
    /// ```
    RealmId
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_id_serde_is_transparent() {
        let json = serde_json::to_string(&RealmId::from(42)).unwrap();
        assert_eq!(json, "42");
        let parsed: RealmId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, RealmId(42));
    }
}
