//! Edit command - patch objects for the duration of a command, then restore them
//!
//! Each YAML document in a patch file names its target through `apiVersion`,
//! `kind`, `metadata.name` and `metadata.namespace`; every other field is the
//! merge patch.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;

use console::style;
use kubehandle_kube::{DynamicResource, ResourceEditor};
use serde_json::Value as JsonValue;

use crate::config::Config;
use crate::error::{CliError, Result};
use crate::exit_codes;

pub async fn run(config: &Config, patch_files: &[PathBuf], command: &[String]) -> Result<()> {
    let mut targets = Vec::new();
    for file in patch_files {
        for document in super::read_documents(file)? {
            targets.push(split_patch(document)?);
        }
    }
    if targets.is_empty() {
        return Err(CliError::usage("patch files contain no documents"));
    }

    let transport = super::connect().await?;
    let schema = config.schema_cache(None).map(Arc::new);
    let mut editor = ResourceEditor::new();
    for (resource, patch) in targets {
        let mut lifecycle = super::resource_lifecycle(Arc::clone(&transport), resource, config);
        if let Some(cache) = &schema {
            lifecycle = lifecycle.with_schema_cache(Arc::clone(cache));
        }
        editor = editor.with_patch(lifecycle, patch);
    }

    let shown = command.join(" ");
    println!(
        "{} Patching {} object(s) while running {}",
        style("→").blue().bold(),
        editor.len(),
        style(&shown).cyan()
    );

    let status = editor
        .scoped(|| async { Ok(run_child(command).await) })
        .await??;
    println!("{} Restored patched objects", style("✓").green().bold());

    if !status.success() {
        return Err(CliError::Command {
            command: shown,
            code: status.code().unwrap_or(exit_codes::ERROR),
        });
    }
    Ok(())
}

/// Split a patch document into its target and the patch body
fn split_patch(mut document: JsonValue) -> Result<(DynamicResource, JsonValue)> {
    let resource = DynamicResource::from_manifest(document.clone())?;
    let label = super::manifest_label(&document);

    let Some(fields) = document.as_object_mut() else {
        return Err(CliError::usage(format!("{label}: patch must be a mapping")));
    };
    fields.remove("apiVersion");
    fields.remove("kind");
    let metadata_left = match fields.get_mut("metadata") {
        Some(JsonValue::Object(metadata)) => {
            metadata.remove("name");
            metadata.remove("namespace");
            !metadata.is_empty()
        }
        _ => false,
    };
    if !metadata_left {
        fields.remove("metadata");
    }
    if fields.is_empty() {
        return Err(CliError::usage(format!("{label}: patch changes nothing")));
    }
    Ok((resource, document))
}

/// Run the child to completion; interrupts are left to the child
async fn run_child(command: &[String]) -> std::io::Result<ExitStatus> {
    let (program, args) = command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no command given")
    })?;
    let mut child = tokio::process::Command::new(program).args(args).spawn()?;
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, restoring once the command exits");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubehandle_kube::ResourceKind;
    use serde_json::json;

    #[test]
    fn test_split_patch() {
        let (resource, patch) = split_patch(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "prod", "labels": {"edited": "yes"}},
            "data": {"mode": "debug"}
        }))
        .unwrap();

        assert_eq!(resource.handle().display_name(), "prod/ConfigMap/settings");
        assert_eq!(
            patch,
            json!({"metadata": {"labels": {"edited": "yes"}}, "data": {"mode": "debug"}})
        );
    }

    #[test]
    fn test_split_patch_drops_empty_metadata() {
        let (_, patch) = split_patch(json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": "prod"},
            "spec": {"finalizers": []}
        }))
        .unwrap();
        assert_eq!(patch, json!({"spec": {"finalizers": []}}));
    }

    #[test]
    fn test_split_patch_rejects_identity_only() {
        let err = split_patch(json!({"apiVersion": "v1", "kind": "Pod", "metadata": {"name": "web"}}))
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::USAGE_ERROR);
    }

    #[test]
    fn test_split_patch_requires_identity() {
        let err = split_patch(json!({"kind": "Pod", "metadata": {"name": "web"}, "spec": {}})).unwrap_err();
        assert_eq!(err.exit_code(), exit_codes::USAGE_ERROR);
    }
}
