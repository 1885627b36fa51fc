//! Handles the `delete` subcommand: `SIGKILL` plus cgroup/state cleanup.

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;

#[derive(Clap, Debug)]
pub struct Delete {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
}

impl Delete {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        engine
            .delete(&self.container_id)
            .with_context(|| format!("failed to delete container {}", self.container_id))
    }
}
