use serde::Serialize;

use crate::config::{Column, JobListLayout};

/// One queued or running job of the user, as reported by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    /// Single-character scheduler state code (`R`, `D` for pending, ...)
    pub state: String,
    pub name: String,
    pub owner: String,
    pub cpus: u32,
    /// Submit or start time exactly as printed by the scheduler
    pub submitted: String,
    /// Node list or pending reason
    pub nodes: String,
}

/// Byte slice `[start, end)` of `line`, clamped to its length and trimmed.
fn field(line: &str, column: Column) -> &str {
    let len = line.len();
    let start = column.start.min(len);
    let end = column.end.unwrap_or(len).clamp(start, len);
    line.get(start..end).unwrap_or_default().trim()
}

fn parse_line(line: &str, layout: &JobListLayout) -> Option<JobRecord> {
    let job_id = field(line, layout.job_id);
    if job_id.is_empty() {
        return None;
    }
    let cpus = field(line, layout.cpus).parse().ok()?;

    Some(JobRecord {
        job_id: job_id.to_string(),
        state: field(line, layout.state).to_string(),
        name: field(line, layout.name).to_string(),
        owner: field(line, layout.owner).to_string(),
        cpus,
        submitted: field(line, layout.submitted).to_string(),
        nodes: field(line, layout.nodes).to_string(),
    })
}

/// Parse the fixed-width job table (header line first).
///
/// Lines that cannot be decoded are skipped. Jobs whose node list contains
/// any of `excluded_nodes` run remote-display sessions and are dropped.
pub fn parse_job_list(text: &str, layout: &JobListLayout, excluded_nodes: &[String]) -> Vec<JobRecord> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            if !line.is_ascii() {
                tracing::debug!(line, "Skipping non-ASCII job line");
                return None;
            }
            parse_line(line, layout)
        })
        .filter(|job| {
            !excluded_nodes
                .iter()
                .any(|node| !node.is_empty() && job.nodes.contains(node.as_str()))
        })
        .collect()
}
