//! Static field policy: which fields of which collection are encrypted.

use std::collections::BTreeMap;

/// Maps each collection name to the ordered list of fields to protect.
///
/// Fields not listed for a collection are never inspected or mutated by
/// the encryption layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPolicy {
    collections: BTreeMap<String, Vec<String>>,
}

impl FieldPolicy {
    /// Build a policy from `(collection, fields)` pairs.
    ///
    /// Duplicate field names are dropped, keeping the first occurrence.
    pub fn new<C, F, S>(entries: C) -> Self
    where
        C: IntoIterator<Item = (S, F)>,
        F: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut collections = BTreeMap::new();
        for (collection, fields) in entries {
            let mut list: Vec<String> = Vec::new();
            for field in fields {
                let field = field.into();
                if !list.contains(&field) {
                    list.push(field);
                }
            }
            collections.insert(collection.into(), list);
        }
        Self { collections }
    }

    /// The built-in policy for the business records store.
    pub fn builtin() -> Self {
        Self::new([
            (
                "clients",
                vec!["email", "phone", "address", "siret", "vatNumber", "notes"],
            ),
            (
                "suppliers",
                vec!["email", "phone", "address", "siret", "iban", "notes"],
            ),
            (
                "invoices",
                vec!["clientName", "clientAddress", "amount", "vatAmount", "total", "notes"],
            ),
            ("quotes", vec!["clientName", "amount", "total", "notes"]),
            ("expenses", vec!["amount", "description", "receiptNumber"]),
            ("company", vec!["siret", "iban", "bic", "address"]),
        ])
    }

    /// Fields protected for `collection`; empty when the collection is unknown.
    pub fn fields(&self, collection: &str) -> &[String] {
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every collection named in the policy, sorted by name.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, Vec<String>>> for FieldPolicy {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self::new(map)
    }
}
