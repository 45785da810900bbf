//! Validate command - check manifests against the local schema directory
//!
//! Works offline: schemas are read from `<schema dir>/<kind>.json`.

use std::path::{Path, PathBuf};

use console::style;
use kubehandle_core::{CoreError, ValidationOutcome};
use serde::Serialize;

use crate::config::Config;
use crate::error::{CliError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentReport {
    file: String,
    resource: String,
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub fn run(config: &Config, files: &[PathBuf], schema_dir: Option<&Path>, json_output: bool) -> Result<()> {
    let cache = config.schema_cache(schema_dir).ok_or_else(|| {
        CliError::config_with_help(
            "no schema directory configured",
            "pass --schema-dir or set schemaDir in the config file",
        )
    })?;

    let mut reports = Vec::new();
    for file in files {
        for manifest in super::read_documents(file)? {
            let resource = super::manifest_label(&manifest);
            let file = file.display().to_string();
            let report = match manifest["kind"].as_str() {
                None => DocumentReport {
                    file,
                    resource,
                    outcome: "invalid",
                    path: None,
                    message: Some("manifest has no kind".to_string()),
                },
                Some(kind) => match cache.validate(kind, &manifest) {
                    Ok(ValidationOutcome::Valid) => DocumentReport {
                        file,
                        resource,
                        outcome: "valid",
                        path: None,
                        message: None,
                    },
                    Ok(ValidationOutcome::Skipped) => DocumentReport {
                        file,
                        resource,
                        outcome: "skipped",
                        path: None,
                        message: Some(format!("no schema for {kind}")),
                    },
                    Err(CoreError::Validation(e)) => DocumentReport {
                        file,
                        resource,
                        outcome: "invalid",
                        path: Some(e.path),
                        message: Some(e.message),
                    },
                    Err(e) => return Err(e.into()),
                },
            };
            reports.push(report);
        }
    }

    let failed = reports.iter().filter(|r| r.outcome == "invalid").count();

    if json_output {
        let output = serde_json::json!({
            "valid": failed == 0,
            "documents": reports,
        });
        let json = serde_json::to_string_pretty(&output).map_err(|e| CliError::internal(e.to_string()))?;
        println!("{json}");
    } else {
        for report in &reports {
            match report.outcome {
                "valid" => println!("  {} {}", style("✓").green(), report.resource),
                "skipped" => println!(
                    "  {} {} ({})",
                    style("⚠").yellow(),
                    report.resource,
                    report.message.as_deref().unwrap_or("skipped")
                ),
                _ => {
                    println!("  {} {}", style("✗").red(), style(&report.resource).red());
                    if let Some(path) = &report.path {
                        println!("      {} {}", style("at").dim(), style(path).yellow());
                    }
                    if let Some(message) = &report.message {
                        println!("      {message}");
                    }
                }
            }
        }
        println!();
        if failed == 0 {
            println!(
                "{} {} document(s) passed validation",
                style("✓").green().bold(),
                reports.len()
            );
        }
    }

    if failed > 0 {
        return Err(CliError::validation_with_help(
            format!("{failed} of {} document(s) failed validation", reports.len()),
            "fix the fields listed above",
        ));
    }
    Ok(())
}
