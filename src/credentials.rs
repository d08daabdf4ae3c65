//! Per-job environment resolution.

use async_trait::async_trait;
use tracing::warn;

use crate::iac::EnvVars;
use crate::job::{EnvVar, Job};

/// Environment for one job. `state` is used for `init`, `commands` for
/// plan/apply/destroy/show, `run` for custom shell steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobEnv {
    pub state: EnvVars,
    pub commands: EnvVars,
    pub run: EnvVars,
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, job: &Job) -> anyhow::Result<JobEnv>;
}

/// Resolves declared variables from literals or the process environment.
pub struct EnvCredentialProvider<F = fn(&str) -> Option<String>> {
    lookup: F,
}

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self {
            lookup: |key| std::env::var(key).ok(),
        }
    }
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> EnvCredentialProvider<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }

    fn resolve_vars(&self, vars: &[EnvVar]) -> EnvVars {
        let mut out = EnvVars::new();
        for var in vars {
            let value = match (&var.value, &var.value_from) {
                (Some(value), _) => Some(value.clone()),
                (None, Some(from)) => {
                    let found = (self.lookup)(from);
                    if found.is_none() {
                        warn!(name = %var.name, from = %from, "Environment variable source is unset");
                    }
                    found
                }
                (None, None) => None,
            };
            if let Some(value) = value {
                out.insert(var.name.clone(), value);
            }
        }
        out
    }
}

#[async_trait]
impl<F> CredentialProvider for EnvCredentialProvider<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    async fn resolve(&self, job: &Job) -> anyhow::Result<JobEnv> {
        let state = self.resolve_vars(&job.state_env_vars);
        let commands = self.resolve_vars(&job.command_env_vars);
        let mut run = state.clone();
        run.extend(commands.clone());
        Ok(JobEnv {
            state,
            commands,
            run,
        })
    }
}
