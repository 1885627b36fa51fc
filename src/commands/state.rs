//! Handles the `state` subcommand: prints the state record as pretty JSON.

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;

#[derive(Clap, Debug)]
pub struct State {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
}

impl State {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        let state = engine
            .state(&self.container_id)
            .with_context(|| format!("failed to query container {}", self.container_id))?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        Ok(())
    }
}
