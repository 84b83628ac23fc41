use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gradebookd")]
#[command(about = "Grade and attendance sidecar speaking JSON lines on stdin/stdout")]
pub struct Config {
    /// Workspace directory to open at startup
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `gradebookd=debug`
    #[arg(long = "log", env = "GRADEBOOKD_LOG")]
    pub log_filter: Option<String>,
}

impl Config {
    /// Logs go to stderr; stdout carries responses only.
    pub fn init_tracing(&self) {
        let filter = match self.log_filter.as_deref() {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info")),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .init();
    }
}
