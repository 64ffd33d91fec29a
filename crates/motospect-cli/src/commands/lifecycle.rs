//! Start / stop / restart commands

use anyhow::Result;
use motospect_orchestrator::{BulkOutcome, ServiceManager};

use crate::output::{OutcomeRow, OutputContext};

pub async fn start(manager: &ServiceManager, name: Option<&str>, ctx: &OutputContext) -> Result<()> {
    match name {
        Some(name) => {
            let record = manager.start(name).await?;
            ctx.success(&format!(
                "Started {} on port {}",
                name,
                record.runtime.port.map(|p| p.to_string()).unwrap_or_default()
            ));
            ctx.print(&[OutcomeRow::from(&BulkOutcome {
                service: name.to_string(),
                result: Ok(record),
            })]);
            Ok(())
        }
        None => {
            let outcomes = manager.start_all().await?;
            report(outcomes, ctx)
        }
    }
}

pub async fn stop(manager: &ServiceManager, name: Option<&str>, ctx: &OutputContext) -> Result<()> {
    match name {
        Some(name) => {
            manager.stop(name).await?;
            ctx.success(&format!("Stopped {}", name));
            Ok(())
        }
        None => report(manager.stop_all().await, ctx),
    }
}

pub async fn restart(manager: &ServiceManager, name: &str, ctx: &OutputContext) -> Result<()> {
    let record = manager.restart(name).await?;
    ctx.success(&format!(
        "Restarted {} (pid {})",
        name,
        record.runtime.pid.map(|p| p.to_string()).unwrap_or_default()
    ));
    Ok(())
}

/// Print a bulk result table and fail with the first error, if any
fn report(outcomes: Vec<BulkOutcome>, ctx: &OutputContext) -> Result<()> {
    let rows: Vec<OutcomeRow> = outcomes.iter().map(OutcomeRow::from).collect();
    ctx.print(&rows);

    match outcomes.into_iter().find_map(|o| o.result.err()) {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
