use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CheckState, CommentRef, PullRequestService};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Mergeable states GitHub reports for a PR that can be merged right now.
const MERGEABLE_STATES: &[&str] = &["clean", "unstable", "has_hooks"];

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct PullRequest {
    state: String,
    #[serde(default)]
    merged: bool,
    mergeable: Option<bool>,
    #[serde(default)]
    mergeable_state: Option<String>,
    head: Head,
}

#[derive(Debug, Deserialize)]
struct Head {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CombinedStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct Review {
    state: String,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: u64,
    html_url: String,
}

/// Split an `owner/repo` namespace, rejecting anything else.
pub fn parse_namespace(namespace: &str) -> Option<(&str, &str)> {
    let (owner, repo) = namespace.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

/// Pull-request operations over the GitHub REST API for one repository.
#[derive(Clone)]
pub struct GithubPullRequestService {
    client: reqwest::Client,
    api_url: String,
    token: String,
    namespace: String,
}

impl GithubPullRequestService {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        namespace: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let namespace = namespace.into();
        if parse_namespace(&namespace).is_none() {
            anyhow::bail!("Invalid repository namespace '{}', expected owner/repo", namespace);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            namespace,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{}", self.api_url, self.namespace, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "plangate")
    }

    async fn pull_request(&self, pr_number: u64) -> anyhow::Result<PullRequest> {
        self.request(reqwest::Method::GET, &self.url(&format!("/pulls/{}", pr_number)))
            .send()
            .await
            .context("Failed to send pull request lookup to GitHub")?
            .error_for_status()
            .with_context(|| format!("GitHub returned error status for PR #{}", pr_number))?
            .json()
            .await
            .context("Failed to parse pull request response from GitHub")
    }
}

#[async_trait]
impl PullRequestService for GithubPullRequestService {
    async fn is_closed(&self, pr_number: u64) -> anyhow::Result<bool> {
        Ok(self.pull_request(pr_number).await?.state == "closed")
    }

    async fn is_merged(&self, pr_number: u64) -> anyhow::Result<bool> {
        Ok(self.pull_request(pr_number).await?.merged)
    }

    async fn is_mergeable(&self, pr_number: u64) -> anyhow::Result<bool> {
        let pr = self.pull_request(pr_number).await?;
        let state_ok = pr
            .mergeable_state
            .as_deref()
            .is_some_and(|s| MERGEABLE_STATES.contains(&s));
        debug!(pr = pr_number, mergeable = ?pr.mergeable, state = ?pr.mergeable_state, "Mergeability");
        Ok(pr.mergeable == Some(true) && state_ok)
    }

    async fn set_status(
        &self,
        pr_number: u64,
        state: CheckState,
        context: &str,
    ) -> anyhow::Result<()> {
        let sha = self.pull_request(pr_number).await?.head.sha;
        self.request(reqwest::Method::POST, &self.url(&format!("/statuses/{}", sha)))
            .json(&json!({
                "state": state.as_str(),
                "context": context,
                "description": format!("{} {}", context, state.as_str()),
            }))
            .send()
            .await
            .context("Failed to send commit status to GitHub")?
            .error_for_status()
            .context("GitHub statuses API returned error status")?;
        Ok(())
    }

    async fn combined_status(&self, pr_number: u64) -> anyhow::Result<CheckState> {
        let sha = self.pull_request(pr_number).await?.head.sha;
        let status: CombinedStatus = self
            .request(reqwest::Method::GET, &self.url(&format!("/commits/{}/status", sha)))
            .send()
            .await
            .context("Failed to send combined status request to GitHub")?
            .error_for_status()
            .context("GitHub combined status API returned error status")?
            .json()
            .await
            .context("Failed to parse combined status from GitHub")?;
        status.state.parse().map_err(|e: String| anyhow::anyhow!(e))
    }

    async fn changed_files(&self, pr_number: u64) -> anyhow::Result<Vec<String>> {
        let url = self.url(&format!("/pulls/{}/files", pr_number));
        let mut files = Vec::new();
        let mut page = 1u32;
        loop {
            let resp: Vec<ChangedFile> = self
                .request(reqwest::Method::GET, &url)
                .query(&[
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .context("Failed to send changed files request to GitHub")?
                .error_for_status()
                .context("GitHub files API returned error status")?
                .json()
                .await
                .context("Failed to parse changed files from GitHub")?;
            let count = resp.len();
            files.extend(resp.into_iter().map(|f| f.filename));
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }
        Ok(files)
    }

    async fn approvals(&self, pr_number: u64) -> anyhow::Result<Vec<String>> {
        let reviews: Vec<Review> = self
            .request(
                reqwest::Method::GET,
                &self.url(&format!("/pulls/{}/reviews", pr_number)),
            )
            .send()
            .await
            .context("Failed to send reviews request to GitHub")?
            .error_for_status()
            .context("GitHub reviews API returned error status")?
            .json()
            .await
            .context("Failed to parse reviews from GitHub")?;
        Ok(reviews
            .into_iter()
            .filter(|r| r.state == "APPROVED")
            .filter_map(|r| r.user.map(|u| u.login))
            .collect())
    }

    async fn publish_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<CommentRef> {
        let comment: IssueComment = self
            .request(
                reqwest::Method::POST,
                &self.url(&format!("/issues/{}/comments", pr_number)),
            )
            .json(&json!({ "body": body }))
            .send()
            .await
            .context("Failed to publish comment to GitHub")?
            .error_for_status()
            .context("GitHub comments API returned error status")?
            .json()
            .await
            .context("Failed to parse comment response from GitHub")?;
        Ok(CommentRef {
            id: comment.id,
            url: comment.html_url,
        })
    }

    async fn edit_comment(
        &self,
        _pr_number: u64,
        comment_id: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.request(
            reqwest::Method::PATCH,
            &self.url(&format!("/issues/comments/{}", comment_id)),
        )
        .json(&json!({ "body": body }))
        .send()
        .await
        .context("Failed to edit comment on GitHub")?
        .error_for_status()
        .context("GitHub comments API returned error status")?;
        Ok(())
    }

    async fn merge(&self, pr_number: u64) -> anyhow::Result<()> {
        self.request(
            reqwest::Method::PUT,
            &self.url(&format!("/pulls/{}/merge", pr_number)),
        )
        .json(&json!({ "merge_method": "merge" }))
        .send()
        .await
        .context("Failed to send merge request to GitHub")?
        .error_for_status()
        .with_context(|| format!("GitHub refused to merge PR #{}", pr_number))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_namespace ──────────────────────────────────────────────

    #[test]
    fn test_parse_namespace() {
        assert_eq!(parse_namespace("acme/infra"), Some(("acme", "infra")));
    }

    #[test]
    fn test_parse_namespace_rejects_missing_repo() {
        assert_eq!(parse_namespace("acme"), None);
        assert_eq!(parse_namespace("acme/"), None);
        assert_eq!(parse_namespace("/infra"), None);
    }

    #[test]
    fn test_parse_namespace_rejects_nested_path() {
        assert_eq!(parse_namespace("acme/infra/extra"), None);
    }

    #[test]
    fn test_new_rejects_bad_namespace() {
        assert!(GithubPullRequestService::new(DEFAULT_GITHUB_API_URL, "t", "bad").is_err());
    }

    #[test]
    fn test_url_building_trims_trailing_slash() {
        let svc =
            GithubPullRequestService::new("https://ghe.example.com/api/v3/", "t", "acme/infra")
                .unwrap();
        assert_eq!(
            svc.url("/pulls/4"),
            "https://ghe.example.com/api/v3/repos/acme/infra/pulls/4"
        );
    }

    // ── response parsing ─────────────────────────────────────────────

    #[test]
    fn test_pull_request_deserialize() {
        let json = r#"{"state":"open","merged":false,"mergeable":true,
                       "mergeable_state":"clean","head":{"sha":"abc123"}}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.state, "open");
        assert_eq!(pr.mergeable, Some(true));
        assert_eq!(pr.head.sha, "abc123");
    }

    #[test]
    fn test_pull_request_unknown_mergeability() {
        let json = r#"{"state":"open","mergeable":null,"head":{"sha":"abc"}}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.mergeable, None);
        assert!(!pr.merged);
    }

    #[test]
    fn test_review_without_user() {
        let json = r#"[{"state":"APPROVED","user":null},{"state":"APPROVED","user":{"login":"ana"}}]"#;
        let reviews: Vec<Review> = serde_json::from_str(json).unwrap();
        let logins: Vec<String> = reviews
            .into_iter()
            .filter_map(|r| r.user.map(|u| u.login))
            .collect();
        assert_eq!(logins, vec!["ana"]);
    }
}
