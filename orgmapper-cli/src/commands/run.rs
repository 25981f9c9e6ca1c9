//! `orgmapper run`: foreground controller.

use anyhow::{Context, Result};
use clap::Args;

use orgmapper_controller::start_blocking;

use super::CliContext;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the poll interval from config.yaml.
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,
}

impl RunArgs {
    pub fn run(self, ctx: CliContext) -> Result<()> {
        let CliContext { home, mut config } = ctx;
        if let Some(secs) = self.poll_interval_secs {
            config.poll_interval_secs = secs.max(1);
        }
        start_blocking(&home, config).context("controller exited with an error")
    }
}
