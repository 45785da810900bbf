//! Delete command - delete an object, optionally waiting until it is gone

use console::style;
use kubehandle_kube::{DynamicResource, NudgePolicy};

use super::{Target, Timing};
use crate::config::Config;
use crate::error::Result;

pub async fn run(
    config: &Config,
    target: &Target,
    wait: bool,
    clear_finalizers: bool,
    timing: &Timing,
) -> Result<()> {
    let budget = config.budget(timing.timeout, timing.interval)?;
    let nudge = if clear_finalizers {
        NudgePolicy::ClearFinalizers
    } else {
        NudgePolicy::None
    };
    let resource = DynamicResource::new(target.handle()).with_nudge(nudge);
    let lifecycle = super::resource_lifecycle(super::connect().await?, resource, config);
    let name = lifecycle.handle().display_name();

    if wait {
        println!("{} Deleting {}", style("→").blue().bold(), style(&name).cyan());
    }
    if lifecycle.delete(wait, &budget).await? {
        let done = if wait { "Deleted" } else { "Deletion requested for" };
        println!("{} {} {}", style("✓").green().bold(), done, style(&name).cyan());
    } else {
        println!("{} {} was already absent", style("·").dim(), style(&name).cyan());
    }
    Ok(())
}
