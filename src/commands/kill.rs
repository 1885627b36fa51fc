//! Handles the `kill` subcommand.

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;
use crate::signal;

#[derive(Clap, Debug)]
pub struct Kill {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
    pub signal: String,
}

impl Kill {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        let signal = signal::from_str(&self.signal)
            .with_context(|| format!("signal {} is unknown", self.signal))?;
        engine
            .kill(&self.container_id, signal)
            .with_context(|| format!("failed to signal container {}", self.container_id))
    }
}
