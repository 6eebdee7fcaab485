// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Composite keys.
//!
//! Format: `NUL | object_type | NUL | attr1 | NUL | attr2 | NUL …`. Time
//! components are fixed-width decimals; descending orders store
//! `i64::MAX − t` so a forward scan yields newest first.

/// Key separator.
pub const SEP: u8 = 0;

/// Object types. Each one names a primary table or a secondary index.
pub mod kind {
    pub const FILE: &str = "file";
    pub const FILE_BY_NAME: &str = "file_by_name";
    pub const FILE_BY_OWNER_TIME: &str = "file_by_owner_time";
    pub const FILE_EXPIRE: &str = "file_expire";
    pub const NAMESPACE: &str = "ns";
    pub const NODE: &str = "node";
    pub const NODE_LIST: &str = "node_list";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SLICE_MIGRATE: &str = "slice_migrate";
    pub const NODE_SLICE_EXPIRE: &str = "node_slice_expire";
    pub const MIGRATION_PENDING: &str = "migration_pending";
    pub const CHALLENGE: &str = "challenge";
    pub const CHALLENGE_BY_NODE: &str = "challenge_by_node";
    pub const CHALLENGE_BY_FILE: &str = "challenge_by_file";
    pub const FILE_AUTH: &str = "file_auth";
    pub const FILE_AUTH_BY_APPLIER: &str = "file_auth_by_applier";
    pub const FILE_AUTH_BY_AUTHORIZER: &str = "file_auth_by_authorizer";
}

/// `NUL part NUL part … NUL`.
pub fn compose(parts: &[&str]) -> Vec<u8> {
    let len = parts.iter().map(|p| p.len() + 1).sum::<usize>() + 1;
    let mut key = Vec::with_capacity(len);
    key.push(SEP);
    for part in parts {
        key.extend_from_slice(part.as_bytes());
        key.push(SEP);
    }
    key
}

/// Refuse a key component containing the separator; it would alias other
/// keys and break [`decompose`].
pub fn check_part(field: &str, value: &str) -> crate::error::Result<()> {
    if value.as_bytes().contains(&SEP) {
        return Err(crate::error::Error::bad_param(format!("{field} must not contain NUL")));
    }
    Ok(())
}

/// Split a composite key back into its parts, object type first.
pub fn decompose(key: &[u8]) -> Vec<String> {
    key.split(|b| *b == SEP)
        .filter(|p| !p.is_empty())
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

/// Last attribute of a composite key; index entries end with the record id.
pub fn last_part(key: &[u8]) -> Option<String> {
    decompose(key).pop()
}

/// Ascending fixed-width time component; negative times clamp to zero.
pub fn asc_time(t: i64) -> String {
    format!("{:019}", t.max(0))
}

/// Descending fixed-width time component.
pub fn desc_time(t: i64) -> String {
    format!("{:019}", i64::MAX - t.max(0))
}

/// Inverse of [`desc_time`].
pub fn parse_desc_time(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().map(|v| i64::MAX - v)
}

// ========== Files ==========

pub fn file_by_id(file_id: &str) -> Vec<u8> {
    compose(&[kind::FILE, file_id])
}

pub fn file_by_name(owner: &str, namespace: &str, name: &str) -> Vec<u8> {
    compose(&[kind::FILE_BY_NAME, owner, namespace, name])
}

pub fn file_by_owner_time(owner: &str, namespace: &str, publish_time: i64, file_id: &str) -> Vec<u8> {
    compose(&[kind::FILE_BY_OWNER_TIME, owner, namespace, &desc_time(publish_time), file_id])
}

pub fn file_by_owner_prefix(owner: &str, namespace: Option<&str>) -> Vec<u8> {
    match namespace {
        Some(ns) => compose(&[kind::FILE_BY_OWNER_TIME, owner, ns]),
        None => compose(&[kind::FILE_BY_OWNER_TIME, owner]),
    }
}

pub fn file_expire(owner: &str, expire_time: i64, file_id: &str) -> Vec<u8> {
    compose(&[kind::FILE_EXPIRE, owner, &asc_time(expire_time), file_id])
}

pub fn file_expire_prefix(owner: &str) -> Vec<u8> {
    compose(&[kind::FILE_EXPIRE, owner])
}

/// Files holding a replica on `node_id`, ordered by file expiry.
pub fn node_slice_expire(node_id: &str, expire_time: i64, file_id: &str) -> Vec<u8> {
    compose(&[kind::NODE_SLICE_EXPIRE, node_id, &asc_time(expire_time), file_id])
}

pub fn node_slice_expire_prefix(node_id: &str) -> Vec<u8> {
    compose(&[kind::NODE_SLICE_EXPIRE, node_id])
}

// ========== Namespaces ==========

pub fn namespace(owner: &str, name: &str) -> Vec<u8> {
    compose(&[kind::NAMESPACE, owner, name])
}

pub fn namespace_prefix(owner: &str) -> Vec<u8> {
    compose(&[kind::NAMESPACE, owner])
}

// ========== Nodes ==========

pub fn node(node_id: &str) -> Vec<u8> {
    compose(&[kind::NODE, node_id])
}

pub fn node_list(reg_time: i64, node_id: &str) -> Vec<u8> {
    compose(&[kind::NODE_LIST, &desc_time(reg_time), node_id])
}

pub fn node_list_prefix() -> Vec<u8> {
    compose(&[kind::NODE_LIST])
}

/// `day` is `YYYY-MM-DD` in UTC.
pub fn heartbeat(node_id: &str, day: &str) -> Vec<u8> {
    compose(&[kind::HEARTBEAT, node_id, day])
}

pub fn slice_migrate(from_node: &str, ctime: i64, slice_id: &str, to_node: &str) -> Vec<u8> {
    compose(&[kind::SLICE_MIGRATE, from_node, &desc_time(ctime), slice_id, to_node])
}

pub fn slice_migrate_prefix(from_node: &str) -> Vec<u8> {
    compose(&[kind::SLICE_MIGRATE, from_node])
}

pub fn migration_pending(owner: &str, ctime: i64, file_id: &str, slice_id: &str) -> Vec<u8> {
    compose(&[kind::MIGRATION_PENDING, owner, &desc_time(ctime), file_id, slice_id])
}

pub fn migration_pending_prefix(owner: &str) -> Vec<u8> {
    compose(&[kind::MIGRATION_PENDING, owner])
}

// ========== Challenges ==========

pub fn challenge(id: &str) -> Vec<u8> {
    compose(&[kind::CHALLENGE, id])
}

pub fn challenge_by_node(node_id: &str, challenge_time: i64, id: &str) -> Vec<u8> {
    compose(&[kind::CHALLENGE_BY_NODE, node_id, &desc_time(challenge_time), id])
}

pub fn challenge_by_node_prefix(node_id: &str) -> Vec<u8> {
    compose(&[kind::CHALLENGE_BY_NODE, node_id])
}

pub fn challenge_by_file(file_id: &str, challenge_time: i64, id: &str) -> Vec<u8> {
    compose(&[kind::CHALLENGE_BY_FILE, file_id, &desc_time(challenge_time), id])
}

pub fn challenge_by_file_prefix(file_id: &str) -> Vec<u8> {
    compose(&[kind::CHALLENGE_BY_FILE, file_id])
}

pub fn challenge_prefix() -> Vec<u8> {
    compose(&[kind::CHALLENGE])
}

// ========== Authorizations ==========

pub fn file_auth(id: &str) -> Vec<u8> {
    compose(&[kind::FILE_AUTH, id])
}

pub fn file_auth_by_applier(applier: &str, create_time: i64, id: &str) -> Vec<u8> {
    compose(&[kind::FILE_AUTH_BY_APPLIER, applier, &desc_time(create_time), id])
}

pub fn file_auth_by_applier_prefix(applier: &str) -> Vec<u8> {
    compose(&[kind::FILE_AUTH_BY_APPLIER, applier])
}

pub fn file_auth_by_authorizer(authorizer: &str, create_time: i64, id: &str) -> Vec<u8> {
    compose(&[kind::FILE_AUTH_BY_AUTHORIZER, authorizer, &desc_time(create_time), id])
}

pub fn file_auth_by_authorizer_prefix(authorizer: &str) -> Vec<u8> {
    compose(&[kind::FILE_AUTH_BY_AUTHORIZER, authorizer])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_wraps_every_part_in_separators() {
        assert_eq!(compose(&["file", "abc"]), b"\0file\0abc\0".to_vec());
        assert_eq!(decompose(b"\0file\0abc\0"), vec!["file", "abc"]);
        assert_eq!(last_part(&file_by_id("xyz")).as_deref(), Some("xyz"));
    }

    #[test]
    fn newer_times_sort_first_in_descending_indexes() {
        let old = challenge_by_node("n", 1_000, "a");
        let new = challenge_by_node("n", 2_000, "b");
        assert!(new < old);
    }

    #[test]
    fn ascending_expiry_sorts_oldest_first() {
        assert!(file_expire("o", 5, "a") < file_expire("o", 50, "b"));
    }

    #[test]
    fn desc_time_is_fixed_width_and_invertible() {
        assert_eq!(desc_time(0).len(), 19);
        assert_eq!(desc_time(1_700_000_000_000_000_000).len(), 19);
        assert_eq!(parse_desc_time(&desc_time(12345)), Some(12345));
    }

    #[test]
    fn owner_prefix_does_not_match_longer_owner() {
        let prefix = file_by_owner_prefix("ab", None);
        let other = file_by_owner_time("abc", "ns", 1, "f");
        assert!(!other.starts_with(&prefix));
    }
}
