#![forbid(unsafe_code)]

pub mod demo;

use clap::{Parser, Subcommand};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Parser, Debug)]
#[command(name = "diamond", version, about = "Debug driver for the Diamond evaluation core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a synthetic search over an in-memory object store and print a
    /// summary of what passed.
    Demo {
        #[arg(long, default_value_t = 20)]
        objects: u8,
        #[arg(long, default_value_t = 128)]
        threshold: i32,
        #[arg(long, default_value_t = 60)]
        pend_hw: usize,
        #[arg(long, default_value_t = 55)]
        pend_lw: usize,
    },
}

/// Parse arguments, run the requested command, and return a process exit
/// code.
pub fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Demo {
            objects,
            threshold,
            pend_hw,
            pend_lw,
        } => {
            let cache_root = std::env::temp_dir().join(format!("diamond-demo-{}", std::process::id()));
            demo::run_demo(
                demo::DemoArgs {
                    objects,
                    threshold,
                    pend_hw,
                    pend_lw,
                },
                cache_root,
            )
        }
    };

    match outcome {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
