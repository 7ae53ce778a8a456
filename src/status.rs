//! Status reporting.  Read-only: nothing here mutates the cluster.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::Result;
use crate::runtime::ClusterRuntime;
use crate::types::{ServiceMode, ServiceStatus, StackPhase, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    #[serde(flatten)]
    pub service: ServiceStatus,
    pub tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackReport {
    pub stack: String,
    pub phase: StackPhase,
    pub services: Vec<ServiceReport>,
}

/// Lists the stack's services and the tasks scheduled for each.
pub async fn report(runtime: &dyn ClusterRuntime, stack: &str) -> Result<StackReport> {
    let services = runtime.list_stack_services(stack).await?;
    let phase = StackPhase::observe(&services);

    let mut reports = Vec::with_capacity(services.len());
    for service in services {
        let tasks = runtime.list_service_tasks(&service.id).await?;
        reports.push(ServiceReport { service, tasks });
    }

    Ok(StackReport {
        stack: stack.to_string(),
        phase,
        services: reports,
    })
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

impl StackReport {
    /// Writes a human readable table.  An empty stack writes nothing.
    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.services.is_empty() {
            return Ok(());
        }

        writeln!(out, "Stack {} ({})", self.stack, self.phase)?;
        writeln!(
            out,
            "{:<14} {:<32} {:<11} {:<9} IMAGE",
            "ID", "NAME", "MODE", "REPLICAS"
        )?;
        for report in &self.services {
            let s = &report.service;
            let mode = match s.mode {
                ServiceMode::Replicated => "replicated",
                ServiceMode::Global => "global",
            };
            writeln!(
                out,
                "{:<14} {:<32} {:<11} {:<9} {}",
                short_id(&s.id),
                s.name,
                mode,
                format!("{}/{}", s.running, s.desired),
                s.image.as_deref().unwrap_or("-")
            )?;
        }

        for report in &self.services {
            if report.tasks.is_empty() {
                continue;
            }
            writeln!(out)?;
            writeln!(out, "Tasks of {}:", report.service.name)?;
            writeln!(
                out,
                "  {:<14} {:<6} {:<20} {:<10} {:<10} DETAIL",
                "ID", "SLOT", "NODE", "DESIRED", "CURRENT"
            )?;
            for task in &report.tasks {
                let detail = task
                    .error
                    .as_deref()
                    .or(task.message.as_deref())
                    .unwrap_or("");
                writeln!(
                    out,
                    "  {:<14} {:<6} {:<20} {:<10} {:<10} {}",
                    short_id(&task.id),
                    task.slot.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    task.node.as_deref().unwrap_or("-"),
                    task.desired_state,
                    task.state,
                    detail
                )?;
            }
        }
        Ok(())
    }
}
