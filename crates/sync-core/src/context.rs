//! Request-scoped sync context.
//!
//! A `SyncContext` travels with every call into the engine and every
//! mutation on a [`DocumentStore`](crate::store::DocumentStore). While a
//! filesystem → store pass mutates records it holds a [`HookSuppression`]
//! guard, and the write-back hooks see `is_syncing() == true` and stand down.

use serde::{Deserialize, Serialize};
use std::cell::Cell;

use crate::config::GitIdentity;

/// The user on whose behalf changes are made. Used as commit author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    pub email: String,
    /// Login shown in quarantine manifests
    #[serde(default)]
    pub login: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            login: name.clone(),
            name,
            email: email.into(),
        }
    }

    /// The configured service identity.
    pub fn system(identity: &GitIdentity) -> Self {
        Self::new(identity.name.clone(), identity.email.clone())
    }

    /// `Name <email>` as accepted by `git commit --author`.
    pub fn git_author(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

pub struct SyncContext {
    actor: Actor,
    syncing: Cell<bool>,
}

impl SyncContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            syncing: Cell::new(false),
        }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// True while a sync operation from the other direction is in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing.get()
    }

    /// Suppress write-back hooks until the returned guard is dropped.
    ///
    /// Guards nest; dropping one restores whatever state was active when it
    /// was taken, including during unwinding.
    pub fn suppress_hooks(&self) -> HookSuppression<'_> {
        let previous = self.syncing.replace(true);
        HookSuppression { ctx: self, previous }
    }
}

#[must_use = "hooks are only suppressed while the guard is alive"]
pub struct HookSuppression<'a> {
    ctx: &'a SyncContext,
    previous: bool,
}

impl Drop for HookSuppression<'_> {
    fn drop(&mut self) {
        self.ctx.syncing.set(self.previous);
    }
}
