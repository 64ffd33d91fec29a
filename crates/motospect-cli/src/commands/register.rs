//! Register command - load service definitions from the config file

use anyhow::{bail, Result};
use motospect_orchestrator::{ServiceConfig, ServiceManager};

use crate::output::{OutputContext, ServiceRow};

/// Register `names` (or every configured service when empty)
pub async fn register(
    manager: &ServiceManager,
    configured: &[ServiceConfig],
    names: &[String],
    ctx: &OutputContext,
) -> Result<()> {
    let selected: Vec<&ServiceConfig> = if names.is_empty() {
        configured.iter().collect()
    } else {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match configured.iter().find(|s| &s.name == name) {
                Some(config) => selected.push(config),
                None => bail!("Service '{}' is not defined in the config file", name),
            }
        }
        selected
    };

    if selected.is_empty() {
        ctx.warn("No services defined in the config file");
        return Ok(());
    }

    let mut rows = Vec::with_capacity(selected.len());
    for config in selected {
        manager.register(config.clone()).await?;
        rows.push(ServiceRow::from(manager.status_of(&config.name).await?));
    }

    ctx.success(&format!("Registered {} service(s)", rows.len()));
    ctx.print(&rows);
    Ok(())
}
