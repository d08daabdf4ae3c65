//! Access and plan policy capability.

use async_trait::async_trait;

use crate::job::Command;

/// Who wants to run what, where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub namespace: String,
    pub project: String,
    pub command: Command,
    pub pr_number: u64,
    pub requested_by: String,
    /// Violations found by the plan policy, if it has run.
    pub plan_policy_violations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanVerdict {
    pub allowed: bool,
    pub violations: Vec<String>,
}

impl PlanVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
        }
    }

    pub fn deny(violations: Vec<String>) -> Self {
        Self {
            allowed: false,
            violations,
        }
    }
}

#[async_trait]
pub trait PolicyChecker: Send + Sync {
    async fn check_access_policy(&self, request: &AccessRequest) -> anyhow::Result<bool>;

    /// Evaluate a machine-readable plan for `project`.
    async fn check_plan_policy(
        &self,
        namespace: &str,
        project: &str,
        plan_json: &str,
    ) -> anyhow::Result<PlanVerdict>;
}

/// Used when no policy engine is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyChecker for AllowAllPolicy {
    async fn check_access_policy(&self, _request: &AccessRequest) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn check_plan_policy(
        &self,
        _namespace: &str,
        _project: &str,
        _plan_json: &str,
    ) -> anyhow::Result<PlanVerdict> {
        Ok(PlanVerdict::allow())
    }
}

/// Message posted when the plan policy rejects a plan.
pub fn plan_violation_message(violations: &[String]) -> String {
    let list = violations
        .iter()
        .map(|v| format!("- {}", v))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Terraform plan failed validation checks :x:\n{}", list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all() {
        let policy = AllowAllPolicy;
        let req = AccessRequest {
            namespace: "acme/infra".into(),
            project: "db".into(),
            command: Command::Apply,
            pr_number: 1,
            requested_by: "ana".into(),
            plan_policy_violations: vec![],
        };
        assert!(policy.check_access_policy(&req).await.unwrap());
        assert!(
            policy
                .check_plan_policy("acme/infra", "db", "{}")
                .await
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn test_violation_message_lists_each_violation() {
        let msg = plan_violation_message(&["no public buckets".into(), "tag owner".into()]);
        assert!(msg.contains("- no public buckets\n- tag owner"));
    }
}
