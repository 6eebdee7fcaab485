// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical signing input.
//!
//! Every signed payload exposes its fields as `(name, value)` pairs. The
//! canonical query sorts them by name, drops any field named `signature`
//! and joins the rest as `k=v` with `&`. Verifiers rebuild the string from
//! the parsed struct, never from the bytes they received.

use std::collections::BTreeMap;

use super::identity::sha256;

/// Name of the field that never takes part in its own signing input.
pub const SIGNATURE_FIELD: &str = "signature";

/// A struct with a canonical signing input.
pub trait CanonicalQuery {
    /// All fields as `(name, value)` pairs, in any order.
    fn query_pairs(&self) -> Vec<(&'static str, String)>;

    fn canonical_query(&self) -> String {
        canonical_query(self.query_pairs())
    }

    /// SHA-256 of [`CanonicalQuery::canonical_query`]; the ECDSA input.
    fn signing_digest(&self) -> [u8; 32] {
        sha256(self.canonical_query().as_bytes())
    }
}

/// Build the canonical `k=v&...` string from arbitrary pairs.
pub fn canonical_query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let sorted: BTreeMap<String, String> = pairs
        .into_iter()
        .filter(|(k, _)| k.as_ref() != SIGNATURE_FIELD)
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();

    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex digest standing in for a list of nested payloads.
pub fn digest_of<T: CanonicalQuery>(items: &[T]) -> String {
    let joined = items
        .iter()
        .map(|item| item.canonical_query())
        .collect::<Vec<_>>()
        .join("\n");
    hex::encode(sha256(joined.as_bytes()))
}

/// Render an optional value; `None` is the empty string.
pub fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        zeta: String,
        alpha: u64,
        signature: String,
    }

    impl CanonicalQuery for Sample {
        fn query_pairs(&self) -> Vec<(&'static str, String)> {
            vec![
                ("zeta", self.zeta.clone()),
                ("alpha", self.alpha.to_string()),
                ("signature", self.signature.clone()),
            ]
        }
    }

    #[test]
    fn sorts_keys_and_omits_signature() {
        let s = Sample {
            zeta: "z".into(),
            alpha: 5,
            signature: "deadbeef".into(),
        };
        assert_eq!(s.canonical_query(), "alpha=5&zeta=z");
    }

    #[test]
    fn signature_value_does_not_change_digest() {
        let a = Sample {
            zeta: "z".into(),
            alpha: 5,
            signature: "one".into(),
        };
        let b = Sample {
            zeta: "z".into(),
            alpha: 5,
            signature: "two".into(),
        };
        assert_eq!(a.signing_digest(), b.signing_digest());
    }

    #[test]
    fn digest_of_depends_on_order_and_content() {
        let a = Sample {
            zeta: "a".into(),
            alpha: 1,
            signature: String::new(),
        };
        let b = Sample {
            zeta: "b".into(),
            alpha: 2,
            signature: String::new(),
        };
        let first = digest_of(&[a, b]);
        let a = Sample {
            zeta: "a".into(),
            alpha: 1,
            signature: String::new(),
        };
        let b = Sample {
            zeta: "b".into(),
            alpha: 2,
            signature: String::new(),
        };
        assert_ne!(first, digest_of(&[b, a]));
    }

    #[test]
    fn optional_values_render_empty() {
        assert_eq!(opt::<u64>(&None), "");
        assert_eq!(opt(&Some(3u64)), "3");
    }
}
