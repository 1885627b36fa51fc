//! Handles the `start` subcommand: releases the init trampoline's `SIGCONT` gate.

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;

#[derive(Clap, Debug)]
pub struct Start {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
}

impl Start {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        engine
            .start(&self.container_id)
            .with_context(|| format!("failed to start container {}", self.container_id))
    }
}
