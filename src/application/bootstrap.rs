use crate::infrastructure::config::{ensure_default_configs, load_configs};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

pub fn workspace_logs_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join("logs")
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_logs_dir(workspace_root);
    let database_path = state_dir.join("dayplan.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    load_configs(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_WORKSPACE: AtomicU64 = AtomicU64::new(0);

    #[test]
    fn bootstrap_creates_layout_and_is_repeatable() {
        let sequence = NEXT_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "dayplan-bootstrap-tests-{}-{}",
            std::process::id(),
            sequence
        ));

        let first = bootstrap_workspace(&root).expect("bootstrap workspace");
        assert!(first.config_dir.join("app.json").exists());
        assert!(first.config_dir.join("planner.json").exists());
        assert!(first.logs_dir.is_dir());
        assert!(first.database_path.exists());
        assert_eq!(first.workspace_root, root);

        let second = bootstrap_workspace(&root).expect("bootstrap again");
        assert_eq!(second.database_path, first.database_path);

        let _ = fs::remove_dir_all(&root);
    }
}
