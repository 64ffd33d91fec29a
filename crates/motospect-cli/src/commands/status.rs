//! Status command - show registered services

use anyhow::Result;
use motospect_orchestrator::ServiceManager;

use crate::output::{OutputContext, ServiceRow};

pub async fn status(manager: &ServiceManager, name: Option<&str>, ctx: &OutputContext) -> Result<()> {
    let rows: Vec<ServiceRow> = match name {
        Some(name) => vec![manager.status_of(name).await?.into()],
        None => manager
            .list_all()
            .await
            .into_iter()
            .map(ServiceRow::from)
            .collect(),
    };

    ctx.print(&rows);
    Ok(())
}
