//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod clean;
pub mod compiler;
pub mod init;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Subcommand;

use crate::config::defaults;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the project
    Build {
        /// Build target
        #[arg(short, long, default_value = defaults::DEFAULT_TARGET)]
        target: String,

        /// Output directory
        #[arg(short, long, default_value = defaults::DEFAULT_OUTPUT_DIR)]
        output: PathBuf,

        /// Number of parallel jobs
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Remove build artifacts and the build cache
    Clean {
        /// Clean only this target (default: all targets)
        #[arg(short, long)]
        target: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = defaults::DEFAULT_OUTPUT_DIR)]
        output: PathBuf,
    },

    /// Build and run the executable
    Run {
        /// Build target
        #[arg(short, long, default_value = defaults::DEFAULT_TARGET)]
        target: String,

        /// Arguments passed to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Create a new project in the current directory
    Init,

    /// List detected compilers
    Compiler,
}

impl Commands {
    /// Run the command
    pub async fn run(self, project_dir: &Path, config: Option<&Path>) -> Result<()> {
        match self {
            Commands::Build {
                target,
                output,
                jobs,
            } => {
                build::execute(
                    project_dir,
                    config,
                    build::BuildArgs {
                        target,
                        output,
                        jobs,
                    },
                )
                .await
            }
            Commands::Clean { target, output } => {
                clean::execute(project_dir, config, target.as_deref(), output)
            }
            Commands::Run { target, args } => {
                run::execute(project_dir, config, &target, &args).await
            }
            Commands::Init => init::execute(project_dir),
            Commands::Compiler => compiler::execute(),
        }
    }
}
