//! Wait command - block until an object exists, reaches a phase or a condition

use std::fmt;
use std::str::FromStr;

use console::style;

use super::{Target, Timing};
use crate::config::Config;
use crate::error::Result;

/// What to wait for, as given to `--for`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// `exists`
    Existence,
    /// `status=<phase>`
    Status(String),
    /// `condition=<type>[=<status>]`, status defaulting to `True`
    Condition { type_: String, status: String },
}

impl FromStr for WaitFor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (what, arg) = match s.split_once('=') {
            Some((what, arg)) => (what, Some(arg)),
            None => (s, None),
        };
        match (what, arg) {
            ("exists", None) => Ok(WaitFor::Existence),
            ("status", Some(phase)) if !phase.is_empty() => Ok(WaitFor::Status(phase.to_string())),
            ("condition", Some(spec)) => {
                let (type_, status) = spec.split_once('=').unwrap_or((spec, "True"));
                if type_.is_empty() || status.is_empty() {
                    return Err(format!("invalid condition '{spec}', expected TYPE[=STATUS]"));
                }
                Ok(WaitFor::Condition {
                    type_: type_.to_string(),
                    status: status.to_string(),
                })
            }
            _ => Err(format!(
                "invalid wait target '{s}', expected exists, status=PHASE or condition=TYPE[=STATUS]"
            )),
        }
    }
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitFor::Existence => f.write_str("existence"),
            WaitFor::Status(phase) => write!(f, "status {phase}"),
            WaitFor::Condition { type_, status } => write!(f, "condition {type_}={status}"),
        }
    }
}

pub async fn run(config: &Config, target: &Target, until: &WaitFor, timing: &Timing) -> Result<()> {
    let budget = config.budget(timing.timeout, timing.interval)?;
    let lifecycle = super::lifecycle(super::connect().await?, target, config);

    println!(
        "{} Waiting up to {:?} for {} to reach {}",
        style("→").blue().bold(),
        budget.timeout,
        style(lifecycle.handle().display_name()).cyan(),
        until
    );

    let reached = match until {
        WaitFor::Existence => {
            lifecycle.wait_for_existence(&budget).await?;
            until.to_string()
        }
        WaitFor::Status(phase) => {
            lifecycle.wait_for_status(phase, &budget).await?;
            until.to_string()
        }
        WaitFor::Condition { type_, status } => lifecycle
            .wait_for_condition(type_, status, &budget)
            .await?
            .summary(),
    };

    println!("{} Reached {}", style("✓").green().bold(), reached);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wait_for() {
        assert_eq!("exists".parse::<WaitFor>().unwrap(), WaitFor::Existence);
        assert_eq!(
            "status=Running".parse::<WaitFor>().unwrap(),
            WaitFor::Status("Running".into())
        );
        assert_eq!(
            "condition=Ready".parse::<WaitFor>().unwrap(),
            WaitFor::Condition {
                type_: "Ready".into(),
                status: "True".into()
            }
        );
        assert_eq!(
            "condition=Available=False".parse::<WaitFor>().unwrap(),
            WaitFor::Condition {
                type_: "Available".into(),
                status: "False".into()
            }
        );
    }

    #[test]
    fn test_parse_wait_for_rejects_garbage() {
        for bad in ["", "status", "status=", "exists=yes", "condition==True", "ready"] {
            assert!(bad.parse::<WaitFor>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(WaitFor::Status("Bound".into()).to_string(), "status Bound");
    }
}
