//! Implementation of the `phaseflow init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::loader::PROJECT_DIR;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Remove and recreate an existing project directory
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_path: Option<PathBuf>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nDefault configuration written to {PROJECT_DIR}/config.yaml"));
        }
        if let Some(db) = &self.database_path {
            lines.push(format!("Database initialized at {}", db.display()));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };
    let project_dir = target_path.join(PROJECT_DIR);

    if project_dir.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_path: None,
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    if args.force && project_dir.exists() {
        fs::remove_dir_all(&project_dir)
            .await
            .with_context(|| format!("Failed to remove existing {PROJECT_DIR} directory"))?;
    }

    let mut directories_created = vec![];
    for dir in [project_dir.clone(), project_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir).to_string_lossy().to_string();
            directories_created.push(relative);
        }
    }

    let mut config = Config::default();
    config.logging.log_dir = Some(format!("{PROJECT_DIR}/logs"));
    let yaml = serde_yaml::to_string(&config).context("Failed to render default configuration")?;
    fs::write(project_dir.join("config.yaml"), yaml)
        .await
        .context("Failed to write configuration file")?;

    let db_path = project_dir.join("phaseflow.db");
    config.database.path = db_path.to_string_lossy().to_string();
    let pool = initialize_database(&config.database)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_path: Some(db_path),
    };

    output(&output_data, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[tokio::test]
    async fn test_init_creates_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs {
            force: false,
            path: dir.path().to_path_buf(),
        };
        execute(args, true).await.unwrap();

        let project = dir.path().join(PROJECT_DIR);
        assert!(project.join("logs").is_dir());
        assert!(project.join("phaseflow.db").is_file());

        let config = ConfigLoader::load_from_file(project.join("config.yaml")).unwrap();
        assert_eq!(config.logging.log_dir.as_deref(), Some(".phaseflow/logs"));

        // A second run without --force leaves the project alone.
        let again = InitArgs {
            force: false,
            path: dir.path().to_path_buf(),
        };
        execute(again, true).await.unwrap();
        assert!(project.join("phaseflow.db").is_file());
    }
}
