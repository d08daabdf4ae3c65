//! Resource change summaries extracted from plan JSON and apply output.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IacSummary {
    pub resources_created: u32,
    pub resources_updated: u32,
    pub resources_deleted: u32,
}

#[derive(Deserialize)]
struct PlanDocument {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
    #[serde(default)]
    output_changes: std::collections::BTreeMap<String, Change>,
}

#[derive(Deserialize)]
struct ResourceChange {
    change: Change,
}

#[derive(Deserialize)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
}

impl Change {
    fn is_no_op(&self) -> bool {
        self.actions.len() == 1 && self.actions[0] == "no-op"
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PulumiPreview {
    #[serde(default)]
    change_summary: PulumiChangeSummary,
}

#[derive(Deserialize, Default)]
struct PulumiChangeSummary {
    #[serde(default)]
    create: u32,
    #[serde(default)]
    update: u32,
    #[serde(default)]
    delete: u32,
}

static APPLY_SUMMARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) added, (\d+) changed, (\d+) destroyed").unwrap());

impl IacSummary {
    /// Parse `terraform show -json` output. Returns `(is_empty, summary)`.
    ///
    /// A plan is empty only when every resource and output change is exactly `["no-op"]`.
    /// Counts are taken from each resource change's first action.
    pub fn from_plan_json(plan_json: &str) -> Result<(bool, Self), ExecutionError> {
        let plan: PlanDocument = serde_json::from_str(plan_json)
            .map_err(|e| ExecutionError::Summary(format!("Unable to parse the plan file: {e}")))?;

        let is_empty = plan.resource_changes.iter().all(|rc| rc.change.is_no_op())
            && plan.output_changes.values().all(Change::is_no_op);

        let mut summary = Self::default();
        for rc in &plan.resource_changes {
            match rc.change.actions.first().map(String::as_str) {
                Some("create") => summary.resources_created += 1,
                Some("update") => summary.resources_updated += 1,
                Some("delete") => summary.resources_deleted += 1,
                _ => {}
            }
        }
        Ok((is_empty, summary))
    }

    /// Parse `pulumi preview --json` output.
    pub fn from_pulumi_preview(preview_json: &str) -> Result<(bool, Self), ExecutionError> {
        let preview: PulumiPreview = serde_json::from_str(preview_json)
            .map_err(|e| ExecutionError::Summary(format!("Unable to parse preview: {e}")))?;
        let summary = Self {
            resources_created: preview.change_summary.create,
            resources_updated: preview.change_summary.update,
            resources_deleted: preview.change_summary.delete,
        };
        Ok((summary.total() == 0, summary))
    }

    /// Find the last `N added, N changed, N destroyed` line in apply output.
    pub fn from_apply_output(output: &str) -> Result<Self, ExecutionError> {
        let caps = output
            .lines()
            .filter_map(|line| APPLY_SUMMARY_REGEX.captures(line))
            .last()
            .ok_or_else(|| {
                ExecutionError::Summary(
                    "could not find resources line in apply output".to_string(),
                )
            })?;

        let num = |i: usize| -> u32 { caps[i].parse().unwrap_or(0) };
        Ok(Self {
            resources_created: num(1),
            resources_updated: num(2),
            resources_deleted: num(3),
        })
    }

    pub fn total(&self) -> u32 {
        self.resources_created + self.resources_updated + self.resources_deleted
    }

    pub fn to_plan_line(&self) -> String {
        format!(
            "Plan: {} to add, {} to change, {} to destroy.",
            self.resources_created, self.resources_updated, self.resources_deleted
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Plan,
    Apply,
}

/// Outcome of one plan or apply, consumed by reporting and the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorResult {
    pub operation: OperationType,
    pub raw_output: String,
    pub summary: IacSummary,
}
