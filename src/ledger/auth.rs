// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File authorization applications.
//!
//! `Unapproved → Approved | Rejected`. Only the authorizer moves an
//! application; an `Approved` record past its `expire_time` stays approved
//! but no longer grants reads.

use super::index;
use super::kv::WriteBatch;
use super::models::{
    AuthStatus, ConfirmFileAuth, FileAuthApplication, ListFileAuthOptions, RejectFileAuth, Signed,
};
use super::Ledger;
use crate::crypto::PublicKey;
use crate::error::{Error, Result};

impl Ledger {
    /// `PublishFileAuthApplication`: signed by the applier. Repeating an
    /// identical application is a no-op.
    pub fn publish_file_auth_application(
        &self,
        req: &Signed<FileAuthApplication>,
    ) -> Result<FileAuthApplication> {
        let app = &req.payload;
        req.verify(&app.applier)?;

        if app.id.is_empty() {
            return Err(Error::bad_param("application id is required"));
        }
        if app.status != AuthStatus::Unapproved
            || app.auth_key.is_some()
            || app.approval_time.is_some()
            || app.reject_reason.is_some()
        {
            return Err(Error::bad_param("a new application must be unapproved"));
        }
        if app.applier == app.authorizer {
            return Err(Error::bad_param("applier cannot authorize itself"));
        }

        let file = self.get_file_by_id(&app.file_id)?;
        if file.owner != app.authorizer {
            return Err(Error::bad_param("authorizer must be the file owner"));
        }

        if let Some(existing) = self.load::<FileAuthApplication>(&index::file_auth(&app.id))? {
            if existing == *app {
                return Ok(existing);
            }
            return Err(Error::already_exists(format!("application {}", app.id)));
        }
        if self.effective_application(&app.applier, &app.file_id)?.is_some() {
            return Err(Error::already_exists(format!(
                "applier already holds an approved authorization for file {}",
                app.file_id
            )));
        }

        let mut batch = WriteBatch::new();
        batch
            .create(index::file_auth(&app.id), Self::encode(app)?)
            .put(
                index::file_auth_by_applier(&app.applier.to_hex(), app.create_time, &app.id),
                Vec::new(),
            )
            .put(
                index::file_auth_by_authorizer(&app.authorizer.to_hex(), app.create_time, &app.id),
                Vec::new(),
            );
        self.commit(batch)?;

        tracing::info!(application_id = %app.id, file_id = %app.file_id, "authorization requested");
        Ok(app.clone())
    }

    /// `ConfirmFileAuthApplication`: the authorizer approves (with an
    /// expiry and the sealed key envelope) or rejects (with a reason).
    pub fn confirm_file_auth_application(
        &self,
        req: &Signed<ConfirmFileAuth>,
    ) -> Result<FileAuthApplication> {
        let p = &req.payload;
        self.settle(&p.application_id, |app| req.verify(&app.authorizer), |app, now| {
            match p.status {
                AuthStatus::Approved => {
                    let expire_time = p
                        .expire_time
                        .filter(|e| *e > now)
                        .ok_or_else(|| Error::bad_param("approval needs a future expire_time"))?;
                    let auth_key = p
                        .auth_key
                        .as_deref()
                        .filter(|k| !k.is_empty() && hex::decode(k).is_ok())
                        .ok_or_else(|| Error::bad_param("approval needs a hex auth_key"))?;
                    app.status = AuthStatus::Approved;
                    app.expire_time = Some(expire_time);
                    app.auth_key = Some(auth_key.to_string());
                    app.approval_time = Some(now);
                }
                AuthStatus::Rejected => {
                    let reason = p
                        .reject_reason
                        .as_deref()
                        .filter(|r| !r.is_empty())
                        .ok_or_else(|| Error::bad_param("rejection needs a reason"))?;
                    app.status = AuthStatus::Rejected;
                    app.reject_reason = Some(reason.to_string());
                }
                AuthStatus::Unapproved => {
                    return Err(Error::bad_param("confirm must approve or reject"));
                }
            }
            Ok(())
        })
    }

    /// `RejectFileAuthApplication`.
    pub fn reject_file_auth_application(&self, req: &Signed<RejectFileAuth>) -> Result<FileAuthApplication> {
        let p = &req.payload;
        self.settle(&p.application_id, |app| req.verify(&app.authorizer), |app, _| {
            if p.reject_reason.is_empty() {
                return Err(Error::bad_param("rejection needs a reason"));
            }
            app.status = AuthStatus::Rejected;
            app.reject_reason = Some(p.reject_reason.clone());
            Ok(())
        })
    }

    fn settle(
        &self,
        application_id: &str,
        verify: impl FnOnce(&FileAuthApplication) -> Result<()>,
        apply: impl FnOnce(&mut FileAuthApplication, i64) -> Result<()>,
    ) -> Result<FileAuthApplication> {
        let key = index::file_auth(application_id);
        let (mut app, raw) =
            self.require::<FileAuthApplication>(&key, &format!("application {application_id}"))?;
        verify(&app)?;
        if app.status.is_terminal() {
            return Err(Error::already_updated(format!(
                "application {application_id} is already {}",
                app.status.as_str()
            )));
        }

        apply(&mut app, self.now())?;
        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), Some(raw)).put(key, Self::encode(&app)?);
        self.commit(batch)?;

        tracing::info!(application_id, status = app.status.as_str(), "authorization settled");
        Ok(app)
    }

    /// `ListFileAuthApplications`: newest first, scoped to one party.
    pub fn list_file_auth_applications(&self, opts: &ListFileAuthOptions) -> Result<Vec<FileAuthApplication>> {
        let prefix = match (&opts.applier, &opts.authorizer) {
            (Some(applier), _) => index::file_auth_by_applier_prefix(&applier.to_hex()),
            (None, Some(authorizer)) => index::file_auth_by_authorizer_prefix(&authorizer.to_hex()),
            (None, None) => return Err(Error::bad_param("applier or authorizer is required")),
        };

        let limit = opts.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for (key, _) in self.scan(&prefix)? {
            if out.len() >= limit {
                break;
            }
            let Some(id) = index::last_part(&key) else {
                continue;
            };
            if let Some(app) = self.load::<FileAuthApplication>(&index::file_auth(&id))? {
                if opts.matches(&app) {
                    out.push(app);
                }
            }
        }
        Ok(out)
    }

    /// `GetAuthApplicationByID`.
    pub fn get_auth_application_by_id(&self, id: &str) -> Result<FileAuthApplication> {
        Ok(self.require(&index::file_auth(id), &format!("application {id}"))?.0)
    }

    /// The applier's approved, unexpired application for `file_id`.
    pub fn effective_application(
        &self,
        applier: &PublicKey,
        file_id: &str,
    ) -> Result<Option<FileAuthApplication>> {
        let now = self.now();
        let opts = ListFileAuthOptions {
            applier: Some(*applier),
            file_id: Some(file_id.to_string()),
            status: Some(AuthStatus::Approved),
            ..Default::default()
        };
        Ok(self
            .list_file_auth_applications(&opts)?
            .into_iter()
            .find(|a| a.is_effective(now)))
    }
}
