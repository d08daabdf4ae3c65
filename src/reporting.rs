//! Surfacing orchestration results to the pull request or the log.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use crate::vcs::PullRequestService;

/// How a report is wrapped before it is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentFormat {
    Plain,
    Comment { title: String },
    Collapsible { title: String, open: bool },
}

impl CommentFormat {
    pub fn comment(title: impl Into<String>) -> Self {
        Self::Comment {
            title: title.into(),
        }
    }

    pub fn collapsible(title: impl Into<String>, open: bool) -> Self {
        Self::Collapsible {
            title: title.into(),
            open,
        }
    }

    pub fn render(&self, text: &str) -> String {
        match self {
            Self::Plain => text.to_string(),
            Self::Comment { title } => format!("**{}**\n\n{}", title, text),
            Self::Collapsible { title, open } => {
                let tag = if *open { "<details open>" } else { "<details>" };
                format!(
                    "{}<summary>{}</summary>\n\n{}\n</details>",
                    tag, title, text
                )
            }
        }
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, text: &str, format: CommentFormat) -> anyhow::Result<()>;
    async fn flush(&self) -> anyhow::Result<()>;
    /// Stop publishing further reports.
    fn suppress(&self);
    fn supports_markdown(&self) -> bool;
}

/// Collapsible when the reporter renders markdown, a titled comment otherwise.
pub fn titled_format(reporter: &dyn Reporter, title: &str) -> CommentFormat {
    if reporter.supports_markdown() {
        CommentFormat::collapsible(title, false)
    } else {
        CommentFormat::comment(title)
    }
}

/// Publishes each report as a PR comment.
pub struct CiReporter {
    prs: Arc<dyn PullRequestService>,
    pr_number: u64,
    suppressed: AtomicBool,
}

impl CiReporter {
    pub fn new(prs: Arc<dyn PullRequestService>, pr_number: u64) -> Self {
        Self {
            prs,
            pr_number,
            suppressed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Reporter for CiReporter {
    async fn report(&self, text: &str, format: CommentFormat) -> anyhow::Result<()> {
        if self.suppressed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.prs
            .publish_comment(self.pr_number, &format.render(text))
            .await
            .with_context(|| format!("Failed to publish comment on PR #{}", self.pr_number))?;
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    fn supports_markdown(&self) -> bool {
        true
    }
}

/// Logs reports instead of publishing them. Used for local CLI runs.
#[derive(Default)]
pub struct StdOutReporter {
    suppressed: AtomicBool,
}

#[async_trait]
impl Reporter for StdOutReporter {
    async fn report(&self, text: &str, format: CommentFormat) -> anyhow::Result<()> {
        if !self.suppressed.load(Ordering::SeqCst) {
            info!(target: "plangate::report", "{}", format.render(text));
        }
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn suppress(&self) {
        self.suppressed.store(true, Ordering::SeqCst);
    }

    fn supports_markdown(&self) -> bool {
        false
    }
}

#[derive(Default)]
pub struct NoopReporter;

#[async_trait]
impl Reporter for NoopReporter {
    async fn report(&self, _text: &str, _format: CommentFormat) -> anyhow::Result<()> {
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn suppress(&self) {}

    fn supports_markdown(&self) -> bool {
        false
    }
}
