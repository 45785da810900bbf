//! Get command - show an object's presence, phase and conditions

use clap::ValueEnum;
use console::style;
use kubehandle_core::{active_condition, conditions_from_body};

use super::Target;
use crate::config::Config;
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Phase and conditions
    #[default]
    Summary,
    Yaml,
    Json,
}

pub async fn run(config: &Config, target: &Target, output: OutputFormat) -> Result<()> {
    let lifecycle = super::lifecycle(super::connect().await?, target, config);
    let handle = lifecycle.handle();

    let Some(body) = lifecycle.instance().await? else {
        return Err(CliError::NotFound {
            message: format!("{} not found", handle.display_name()),
        });
    };

    match output {
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&body).map_err(|e| CliError::internal(e.to_string()))?;
            print!("{yaml}");
        }
        OutputFormat::Json => {
            let json =
                serde_json::to_string_pretty(&body).map_err(|e| CliError::internal(e.to_string()))?;
            println!("{json}");
        }
        OutputFormat::Summary => {
            println!("{}", style(handle.display_name()).bold().underlined());
            println!(
                "  API version: {}",
                body["apiVersion"].as_str().unwrap_or("<unknown>")
            );
            let phase = body["status"]["phase"].as_str().unwrap_or("-");
            let phase = match phase {
                "Failed" => style(phase).red(),
                "Running" | "Succeeded" | "Active" | "Bound" => style(phase).green(),
                "-" => style(phase).dim(),
                _ => style(phase).yellow(),
            };
            println!("  Phase:       {phase}");

            let conditions = conditions_from_body(&body);
            if !conditions.is_empty() {
                println!("\n{}", style("CONDITIONS").bold().underlined());
                for condition in &conditions {
                    // superseded entries of the same type are left unmarked
                    let active = active_condition(&conditions, &condition.type_)
                        .is_some_and(|a| std::ptr::eq(a, condition));
                    let marker = if active { "*" } else { " " };
                    let status = match condition.status.as_str() {
                        "True" => style(condition.status.as_str()).green(),
                        "False" => style(condition.status.as_str()).red(),
                        _ => style(condition.status.as_str()).dim(),
                    };
                    println!(
                        " {marker} {:<24} {:<8} {}",
                        condition.type_,
                        status,
                        condition.message.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }
    Ok(())
}
