//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`            |
//! | `order`  | `Order`          |
//! | `config` | `Config`         |
//! | `lock`   | `Lock`           |
//! | `runs`   | `Runs`           |

pub mod config;
pub mod lock;
pub mod order;
pub mod run;
pub mod runs;

pub use config::cmd_config;
pub use lock::cmd_lock;
pub use order::cmd_order;
pub use run::{RunArgs, cmd_run};
pub use runs::cmd_runs;

use anyhow::Result;
use std::path::Path;

use plangate::config::{CONFIG_FILE, PlangateConfig};

/// Load and validate `plangate.yml` from the checkout root.
pub(crate) fn load_config(project_dir: &Path) -> Result<PlangateConfig> {
    PlangateConfig::load(&project_dir.join(CONFIG_FILE))
}
