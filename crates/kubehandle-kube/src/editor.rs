//! Reversible edits across several objects
//!
//! A [`ResourceEditor`] maps objects to merge patches. Applying records, per
//! object, the backup patch that undoes the edit; restoring re-applies the
//! backups. Server-owned fields are never restored.
//!
//! Each object carries one patch: patches added for an object already in the
//! set are folded into its patch, so every backup is taken against the state
//! the object really had before the edit.

use std::future::Future;

use kubehandle_core::{compose_merge_patches, compute_backup, strip_server_fields};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::handle::ResourceHandle;
use crate::lifecycle::ResourceLifecycle;

/// Patch set with backups
///
/// There is no atomicity across objects: a failure part way through leaves
/// earlier patches applied, and [`ResourceEditor::restore`] undoes exactly
/// those.
#[derive(Default)]
pub struct ResourceEditor {
    targets: Vec<(ResourceLifecycle, JsonValue)>,
    applied: Vec<(ResourceLifecycle, JsonValue)>,
}

impl ResourceEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `patch` for `target`, after any patch already added for it
    pub fn with_patch(mut self, target: ResourceLifecycle, patch: JsonValue) -> Self {
        let existing = self
            .targets
            .iter_mut()
            .find(|(known, _)| same_object(known.handle(), target.handle()));
        match existing {
            Some((_, combined)) => {
                tracing::debug!(resource = %target.handle(), "combining patches for the same object");
                compose_merge_patches(combined, &patch);
            }
            None => self.targets.push((target, patch)),
        }
        self
    }

    /// Number of distinct objects
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Backups of the patches applied so far
    pub fn backups(&self) -> impl Iterator<Item = (&ResourceHandle, &JsonValue)> {
        self.applied.iter().map(|(l, backup)| (l.handle(), backup))
    }

    /// Apply every patch that changes something
    ///
    /// All backups are computed before the first patch is sent. Returns the
    /// number of patches applied.
    pub async fn apply(&mut self) -> Result<usize> {
        let mut pending = Vec::new();
        for (target, patch) in &self.targets {
            let current = target.instance().await?.ok_or_else(|| target.not_found())?;
            match compute_backup(&current, patch) {
                Some(backup) => pending.push((target.clone(), patch.clone(), backup)),
                None => tracing::warn!(resource = %target.handle(), "patch changes nothing, skipping"),
            }
        }

        let count = pending.len();
        for (target, patch, backup) in pending {
            target.update(&patch).await?;
            self.applied.push((target, backup));
        }
        Ok(count)
    }

    /// Undo applied patches, most recent first
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn restore(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some((target, mut backup)) = self.applied.pop() {
            strip_server_fields(&mut backup);
            if backup.as_object().is_some_and(|b| b.is_empty()) {
                continue;
            }
            tracing::info!(resource = %target.handle(), "restoring");
            if let Err(e) = target.update(&backup).await {
                tracing::warn!(resource = %target.handle(), error = %e, "restore failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply, run `f`, then restore whatever was applied
    ///
    /// Restoring happens even when applying or `f` fails; their error wins
    /// over a restore error.
    pub async fn scoped<F, Fut, T>(mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = match self.apply().await {
            Ok(_) => f().await,
            Err(e) => Err(e),
        };
        let restored = self.restore().await;
        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore_err)) => {
                tracing::warn!(error = %restore_err, "restore after failure also failed");
                Err(e)
            }
        }
    }
}

fn same_object(a: &ResourceHandle, b: &ResourceHandle) -> bool {
    a.kind() == b.kind() && a.namespace() == b.namespace() && a.name() == b.name()
}
