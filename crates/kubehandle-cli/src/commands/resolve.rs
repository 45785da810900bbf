//! Resolve command - newest served apiVersion of a kind

use console::style;
use kubehandle_core::ApiVersion;
use kubehandle_kube::ApiVersionResolver;

use crate::config::Config;
use crate::error::Result;

pub async fn run(config: &Config, group: &str, kind: &str, max_version: Option<ApiVersion>) -> Result<()> {
    let transport = super::connect().await?;
    let ceiling = max_version.unwrap_or(config.max_api_version);
    let resolver = ApiVersionResolver::new(transport).with_ceiling(ceiling);

    let api_version = resolver.resolve(group, kind).await?;
    println!(
        "{} {} {} {}",
        style("✓").green().bold(),
        style(kind).cyan(),
        style("→").dim(),
        style(&api_version).bold()
    );
    Ok(())
}
