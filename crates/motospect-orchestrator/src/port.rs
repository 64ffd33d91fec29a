//! TCP port allocation
//!
//! Ports are handed out from a configured range and held per service until
//! the service is explicitly freed. A port is only returned after a real bind
//! probe succeeds, so ports taken by unrelated processes are skipped.

use std::collections::{HashMap, HashSet};
use std::net::TcpListener;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::PortSettings;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Allocates free TCP ports to services
pub struct PortManager {
    settings: PortSettings,
    /// Service name -> exclusively held port
    allocated: Mutex<HashMap<String, u16>>,
}

impl PortManager {
    pub fn new(settings: PortSettings) -> Self {
        Self {
            settings,
            allocated: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether `port` can currently be bound
    pub fn is_available(&self, port: u16) -> bool {
        TcpListener::bind((self.settings.probe_host.as_str(), port)).is_ok()
    }

    /// Allocate a port for `service`
    ///
    /// Reuses the port already held by the service if it still binds,
    /// otherwise scans the range in ascending order.
    pub fn allocate(&self, service: &str) -> OrchestratorResult<u16> {
        let mut table = self.allocated.lock();

        if let Some(&port) = table.get(service) {
            if !self.settings.reserved.contains(&port) && self.is_available(port) {
                debug!(service = %service, port, "Reusing previously allocated port");
                return Ok(port);
            }
        }

        let held: HashSet<u16> = table
            .iter()
            .filter(|(name, _)| name.as_str() != service)
            .map(|(_, port)| *port)
            .collect();

        for port in self.settings.range_start..self.settings.range_end {
            if self.settings.reserved.contains(&port) || held.contains(&port) {
                continue;
            }
            if self.is_available(port) {
                table.insert(service.to_string(), port);
                info!(service = %service, port, "Allocated port");
                return Ok(port);
            }
        }

        Err(OrchestratorError::ResourceExhausted {
            service: service.to_string(),
            start: self.settings.range_start,
            end: self.settings.range_end,
        })
    }

    /// Record a fixed port for `service`
    pub fn claim(&self, service: &str, port: u16) -> OrchestratorResult<()> {
        let mut table = self.allocated.lock();
        if let Some((holder, _)) = table
            .iter()
            .find(|(name, held)| **held == port && name.as_str() != service)
        {
            return Err(OrchestratorError::PortInUse {
                service: service.to_string(),
                port,
                holder: holder.clone(),
            });
        }
        table.insert(service.to_string(), port);
        Ok(())
    }

    /// Release the port held by `service`
    pub fn free(&self, service: &str) -> Option<u16> {
        let freed = self.allocated.lock().remove(service);
        if let Some(port) = freed {
            debug!(service = %service, port, "Freed port");
        }
        freed
    }

    pub fn port_of(&self, service: &str) -> Option<u16> {
        self.allocated.lock().get(service).copied()
    }

    /// Snapshot of the allocation table
    pub fn allocations(&self) -> HashMap<String, u16> {
        self.allocated.lock().clone()
    }
}
