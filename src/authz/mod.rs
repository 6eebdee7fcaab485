// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # File Authorization
//!
//! Applier and owner sides of the `Unapproved → Approved | Rejected`
//! workflow. On approval the owner seals the file key and every replica key
//! into an ECIES envelope addressed to the applier; the reader opens it to
//! decrypt the structure and slices without ever learning the owner secret.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::keys::SliceKeyMap;
use crate::crypto::{ecies, FileKey, FileKeys, Identity, PublicKey};
use crate::error::{Error, ErrorKind, Result};
use crate::ledger::{
    AuthStatus, ConfirmFileAuth, File, FileAuthApplication, Ledger, ListFileAuthOptions,
    RejectFileAuth, Signed,
};

// =============================================================================
// Key envelope
// =============================================================================

/// Plaintext of an approval's `auth_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthKeyEnvelope {
    #[serde(rename = "firstEncSecret")]
    pub file_key: FileKey,
    #[serde(rename = "secondEncSecret")]
    pub slice_keys: SliceKeyMap,
}

impl AuthKeyEnvelope {
    /// Every key of `file`, derived from the owner identity.
    pub fn for_file(owner: &Identity, file: &File) -> Result<Self> {
        let keys = FileKeys::derive(
            owner,
            &file.id,
            file.slices
                .iter()
                .map(|s| (s.slice_id.as_str(), s.node_id.as_str())),
        )?;
        Ok(Self {
            file_key: keys.file_key,
            slice_keys: keys.slice_keys,
        })
    }

    /// Hex ECIES envelope to `recipient`.
    pub fn seal(&self, recipient: &PublicKey) -> Result<String> {
        let plain = serde_json::to_vec(self)?;
        Ok(hex::encode(ecies::encrypt(recipient, &plain)?))
    }

    pub fn open(identity: &Identity, sealed_hex: &str) -> Result<Self> {
        let sealed =
            hex::decode(sealed_hex).map_err(|e| Error::crypto(format!("auth key is not hex: {e}")))?;
        let plain = ecies::decrypt(identity, &sealed)?;
        serde_json::from_slice(&plain).map_err(|e| Error::crypto(format!("malformed auth key: {e}")))
    }

    pub fn into_file_keys(self) -> FileKeys {
        FileKeys {
            file_key: self.file_key,
            slice_keys: self.slice_keys,
        }
    }
}

/// Keys `identity` may use to read `file`: derived for the owner, released
/// through an effective approval for anyone else.
pub fn resolve_file_keys(ledger: &Ledger, identity: &Identity, file: &File) -> Result<FileKeys> {
    let reader = identity.public_key();
    if reader == file.owner {
        return FileKeys::derive(
            identity,
            &file.id,
            file.slices
                .iter()
                .map(|s| (s.slice_id.as_str(), s.node_id.as_str())),
        );
    }

    let app = ledger
        .effective_application(&reader, &file.id)?
        .ok_or_else(|| Error::unauthorized(format!("no effective authorization for file {}", file.id)))?;
    let sealed = app
        .auth_key
        .as_deref()
        .ok_or_else(|| Error::unauthorized(format!("application {} carries no key", app.id)))?;
    Ok(AuthKeyEnvelope::open(identity, sealed)?.into_file_keys())
}

// =============================================================================
// Client
// =============================================================================

/// Signs authorization requests as one identity, either party.
#[derive(Debug, Clone)]
pub struct AuthClient {
    identity: Arc<Identity>,
    ledger: Ledger,
}

impl AuthClient {
    pub fn new(identity: Arc<Identity>, ledger: Ledger) -> Self {
        Self { identity, ledger }
    }

    fn application_id(applier: &PublicKey, file_id: &str, name: &str, description: &str, salt: &str) -> String {
        let seed = format!("{}|{file_id}|{name}|{description}|{salt}", applier.to_hex());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).to_string()
    }

    // ========== Applier side ==========

    /// Apply to read `file_id`.
    ///
    /// Repeating an application that is still pending or effective returns
    /// it unchanged; after a rejection or expiry a fresh one is filed.
    pub async fn apply(&self, file_id: &str, name: &str, description: &str) -> Result<FileAuthApplication> {
        let file = self.ledger.get_file_by_id(file_id)?;
        let applier = self.identity.public_key();
        let now = self.ledger.now();

        let stable_id = Self::application_id(&applier, file_id, name, description, "");
        match self.ledger.get_auth_application_by_id(&stable_id) {
            Ok(existing) if existing.status == AuthStatus::Unapproved || existing.is_effective(now) => {
                debug!(application_id = %existing.id, "application already filed");
                return Ok(existing);
            }
            Ok(_) => {}
            Err(e) if e.is(ErrorKind::NotFound) => {}
            Err(e) => return Err(e),
        }
        if let Some(live) = self.ledger.effective_application(&applier, file_id)? {
            return Ok(live);
        }

        let id = match self.ledger.get_auth_application_by_id(&stable_id) {
            Ok(_) => Self::application_id(&applier, file_id, name, description, &now.to_string()),
            Err(_) => stable_id,
        };
        let app = FileAuthApplication {
            id,
            file_id: file_id.to_string(),
            applier,
            authorizer: file.owner,
            name: name.to_string(),
            description: description.to_string(),
            status: AuthStatus::Unapproved,
            auth_key: None,
            reject_reason: None,
            create_time: now,
            approval_time: None,
            expire_time: None,
        };
        let app = self
            .ledger
            .publish_file_auth_application(&Signed::new(&self.identity, app)?)?;
        info!(application_id = %app.id, file_id, "authorization applied for");
        Ok(app)
    }

    /// Applications filed by this identity, newest first.
    pub fn list_applied(&self, status: Option<AuthStatus>) -> Result<Vec<FileAuthApplication>> {
        self.ledger.list_file_auth_applications(&ListFileAuthOptions {
            applier: Some(self.identity.public_key()),
            status,
            ..Default::default()
        })
    }

    // ========== Owner side ==========

    /// Applications awaiting this identity's decision.
    pub fn list_pending(&self) -> Result<Vec<FileAuthApplication>> {
        self.ledger.list_file_auth_applications(&ListFileAuthOptions {
            authorizer: Some(self.identity.public_key()),
            status: Some(AuthStatus::Unapproved),
            ..Default::default()
        })
    }

    pub fn get(&self, application_id: &str) -> Result<FileAuthApplication> {
        self.ledger.get_auth_application_by_id(application_id)
    }

    /// Approve until `expire_time`, releasing the file's keys to the
    /// applier. Repeating an approval returns the approved record.
    pub async fn approve(&self, application_id: &str, expire_time: i64) -> Result<FileAuthApplication> {
        let app = self.ledger.get_auth_application_by_id(application_id)?;
        if app.authorizer != self.identity.public_key() {
            return Err(Error::unauthorized("only the file owner may approve"));
        }
        if app.status.is_terminal() {
            return Self::same_outcome(app, AuthStatus::Approved);
        }

        let file = self.ledger.get_file_by_id(&app.file_id)?;
        let auth_key = AuthKeyEnvelope::for_file(&self.identity, &file)?.seal(&app.applier)?;
        let payload = ConfirmFileAuth {
            application_id: application_id.to_string(),
            status: AuthStatus::Approved,
            expire_time: Some(expire_time),
            auth_key: Some(auth_key),
            reject_reason: None,
            timestamp: self.ledger.now(),
        };
        self.settled(
            application_id,
            AuthStatus::Approved,
            self.ledger
                .confirm_file_auth_application(&Signed::new(&self.identity, payload)?),
        )
    }

    pub async fn reject(&self, application_id: &str, reason: &str) -> Result<FileAuthApplication> {
        let payload = RejectFileAuth {
            application_id: application_id.to_string(),
            reject_reason: reason.to_string(),
            timestamp: self.ledger.now(),
        };
        self.settled(
            application_id,
            AuthStatus::Rejected,
            self.ledger
                .reject_file_auth_application(&Signed::new(&self.identity, payload)?),
        )
    }

    /// A lost race or a repeat is fine only when the application already
    /// ended the way this call wanted.
    fn settled(
        &self,
        application_id: &str,
        wanted: AuthStatus,
        result: Result<FileAuthApplication>,
    ) -> Result<FileAuthApplication> {
        match result {
            Err(e) if e.is(ErrorKind::AlreadyUpdated) => {
                Self::same_outcome(self.ledger.get_auth_application_by_id(application_id)?, wanted)
            }
            other => other,
        }
    }

    fn same_outcome(app: FileAuthApplication, wanted: AuthStatus) -> Result<FileAuthApplication> {
        if app.status == wanted {
            Ok(app)
        } else {
            Err(Error::already_updated(format!(
                "application {} is already {}",
                app.id,
                app.status.as_str()
            )))
        }
    }
}
