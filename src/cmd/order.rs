//! Dependency order of configured projects (`plangate order`).

use anyhow::Result;
use std::path::Path;

pub fn cmd_order(project_dir: &Path) -> Result<()> {
    let config = super::load_config(project_dir)?;
    let graph = config.graph()?;
    let order = graph.stable_topological_sort()?;

    if order.is_empty() {
        println!("No projects configured.");
        return Ok(());
    }

    for (i, name) in order.iter().enumerate() {
        let deps = graph.dependencies(name);
        if deps.is_empty() {
            println!("{:>3}. {}", i + 1, name);
        } else {
            println!("{:>3}. {} (after {})", i + 1, name, deps.join(", "));
        }
    }
    Ok(())
}
