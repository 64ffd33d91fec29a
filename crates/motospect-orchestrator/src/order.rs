//! Dependency ordering for bulk start/stop

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::ServiceConfig;

/// Order services so every dependency precedes its dependents
///
/// Ties are broken by name so the order is stable across runs.
pub fn startup_order<'a, I>(configs: I) -> OrchestratorResult<Vec<String>>
where
    I: IntoIterator<Item = &'a ServiceConfig>,
{
    let configs: BTreeMap<&str, &ServiceConfig> =
        configs.into_iter().map(|c| (c.name.as_str(), c)).collect();

    let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (&name, config) in &configs {
        let mut deps = BTreeSet::new();
        for dep in &config.dependencies {
            if !configs.contains_key(dep.as_str()) {
                return Err(OrchestratorError::UnknownDependency {
                    service: name.to_string(),
                    dependency: dep.clone(),
                });
            }
            deps.insert(dep.as_str());
        }
        pending.insert(name, deps);
    }

    let mut order = Vec::with_capacity(pending.len());
    loop {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            break;
        }

        for name in ready {
            pending.remove(name);
            for deps in pending.values_mut() {
                deps.remove(name);
            }
            order.push(name.to_string());
        }
    }

    if !pending.is_empty() {
        return Err(OrchestratorError::DependencyCycle(
            pending.keys().map(|name| name.to_string()).collect(),
        ));
    }

    Ok(order)
}
