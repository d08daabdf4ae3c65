use std::path::{Path, PathBuf};

/// Names and locations of a project's plan file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPathProvider {
    pub pr_number: Option<u64>,
    pub project_dir: PathBuf,
    pub namespace: String,
    pub project_name: String,
}

impl PlanPathProvider {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        namespace: impl Into<String>,
        project_name: impl Into<String>,
        pr_number: Option<u64>,
    ) -> Self {
        Self {
            pr_number,
            project_dir: project_dir.into(),
            namespace: namespace.into(),
            project_name: project_name.into(),
        }
    }

    pub fn artifact_name(&self) -> &str {
        &self.project_name
    }

    /// `<namespace with / replaced by ->-<pr>-<project>.tfplan`
    pub fn stored_plan_file_name(&self) -> String {
        let namespace = self.namespace.replace('/', "-");
        match self.pr_number {
            Some(pr) => format!("{}-{}-{}.tfplan", namespace, pr, self.project_name),
            None => format!("{}-{}.tfplan", namespace, self.project_name),
        }
    }

    pub fn local_plan_path(&self) -> PathBuf {
        self.project_dir.join(self.stored_plan_file_name())
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_name_with_pr() {
        let p = PlanPathProvider::new("/work/net", "acme/infra", "network", Some(42));
        assert_eq!(p.stored_plan_file_name(), "acme-infra-42-network.tfplan");
        assert_eq!(p.artifact_name(), "network");
        assert_eq!(
            p.local_plan_path(),
            PathBuf::from("/work/net/acme-infra-42-network.tfplan")
        );
    }

    #[test]
    fn test_stored_name_without_pr() {
        let p = PlanPathProvider::new("/work/net", "acme/infra", "network", None);
        assert_eq!(p.stored_plan_file_name(), "acme-infra-network.tfplan");
    }
}
