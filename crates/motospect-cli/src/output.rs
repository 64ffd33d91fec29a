//! Output formatting for motospect-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use motospect_orchestrator::{BulkOutcome, ServiceStatusReport};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg.green());
        }
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print rows in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No services");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }

    /// Print an arbitrary JSON document (call results)
    pub fn print_json(&self, value: &serde_json::Value) {
        match self.format {
            OutputFormat::Csv => println!("{}", escape_csv(&value.to_string())),
            _ => println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            ),
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    let Some(first) = data.first() else {
        return;
    };

    let first = serde_json::to_value(first).unwrap_or_default();
    if let serde_json::Value::Object(map) = &first {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Service display for status / start / stop
#[derive(Debug, Tabled, Serialize)]
pub struct ServiceRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Port")]
    pub port: String,
    #[tabled(rename = "PID")]
    pub pid: String,
    #[tabled(rename = "Healthy")]
    pub healthy: String,
    #[tabled(rename = "Started")]
    pub started_at: String,
    #[tabled(rename = "Depends on")]
    pub dependencies: String,
}

impl From<ServiceStatusReport> for ServiceRow {
    fn from(report: ServiceStatusReport) -> Self {
        Self {
            name: report.name,
            status: report.status.to_string(),
            port: or_dash(report.port),
            pid: or_dash(report.pid),
            healthy: if report.healthy { "yes" } else { "no" }.to_string(),
            started_at: or_dash(report.started_at.map(|t| t.format("%Y-%m-%d %H:%M:%S"))),
            dependencies: report.dependencies.join(" "),
        }
    }
}

/// Per-service result of a bulk operation
#[derive(Debug, Tabled, Serialize)]
pub struct OutcomeRow {
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Port")]
    pub port: String,
    #[tabled(rename = "PID")]
    pub pid: String,
}

impl From<&BulkOutcome> for OutcomeRow {
    fn from(outcome: &BulkOutcome) -> Self {
        match &outcome.result {
            Ok(record) => Self {
                service: outcome.service.clone(),
                result: record.runtime.status.to_string(),
                port: or_dash(record.runtime.port),
                pid: or_dash(record.runtime.pid),
            },
            Err(e) => Self {
                service: outcome.service.clone(),
                result: e.to_string(),
                port: "-".to_string(),
                pid: "-".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motospect_orchestrator::ServiceStatus;

    #[test]
    fn csv_escaping() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn stopped_service_row_uses_dashes() {
        let row = ServiceRow::from(ServiceStatusReport {
            name: "vin".to_string(),
            status: ServiceStatus::Stopped,
            port: None,
            pid: None,
            health_url: None,
            started_at: None,
            dependencies: vec!["a".to_string(), "b".to_string()],
            healthy: false,
        });
        assert_eq!(row.status, "stopped");
        assert_eq!(row.port, "-");
        assert_eq!(row.pid, "-");
        assert_eq!(row.healthy, "no");
        assert_eq!(row.dependencies, "a b");
    }
}
