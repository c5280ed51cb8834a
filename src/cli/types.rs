//! CLI type definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tunelab")]
#[command(about = "Tunelab - Hyperparameter search orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "tunelab.toml")]
    pub config: PathBuf,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize configuration and database
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Run the controllers until interrupted
    Serve,

    /// Experiment management commands
    #[command(subcommand)]
    Experiment(ExperimentCommands),

    /// Trial inspection commands
    #[command(subcommand)]
    Trial(TrialCommands),
}

#[derive(Subcommand)]
pub enum ExperimentCommands {
    /// Submit an experiment from a JSON manifest
    Submit {
        /// Path to the experiment manifest
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List experiments
    List {
        /// Restrict to one namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show one experiment's status
    Get {
        name: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,
    },

    /// Request deletion of an experiment and its children
    Delete {
        name: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,
    },
}

#[derive(Subcommand)]
pub enum TrialCommands {
    /// List the trials of an experiment
    List {
        /// Owning experiment name
        experiment: String,

        #[arg(short, long, default_value = "default")]
        namespace: String,
    },
}
