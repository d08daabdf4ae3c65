//! Lock inspection and release (`plangate lock`).

use anyhow::{Context, Result};
use std::path::Path;

use plangate::execution::PlanPathProvider;
use plangate::job::lock_id;
use plangate::locking;
use plangate::settings::Settings;
use plangate::storage::{LocalPlanStorage, PlanStorage};

use super::super::LockCommands;

pub async fn cmd_lock(project_dir: &Path, command: LockCommands) -> Result<()> {
    let settings = Settings::resolve(project_dir)?;
    let store = locking::from_settings(&settings)?;

    match command {
        LockCommands::Status { project, namespace } => {
            let key = lock_id(&namespace, &project);
            match store.read(&key).await.context("Failed to read lock")? {
                Some(holder) => println!("{} is locked by PR #{}", key, holder),
                None => println!("{} is unlocked", key),
            }
        }
        LockCommands::ForceUnlock { project, namespace } => {
            let key = lock_id(&namespace, &project);
            let Some(holder) = store.read(&key).await.context("Failed to read lock")? else {
                println!("{} is not locked", key);
                return Ok(());
            };
            store.release(&key).await.context("Failed to release lock")?;

            // The holder's stored plan was made under the released lock.
            let paths = PlanPathProvider::new(project_dir, &namespace, &project, Some(holder));
            LocalPlanStorage::new(&settings.plan_storage_dir)
                .delete(paths.artifact_name(), &paths.stored_plan_file_name())
                .await?;
            println!("Released {} (was held by PR #{})", key, holder);
        }
    }
    Ok(())
}
