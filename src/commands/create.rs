//! Handles the `create` subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;

#[derive(Clap, Debug)]
pub struct Create {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
    /// path to the bundle directory, containing config.json and the rootfs
    pub bundle: PathBuf,
}

impl Create {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        engine
            .create(&self.container_id, &self.bundle)
            .with_context(|| format!("failed to create container {}", self.container_id))?;
        println!("{}", self.container_id);
        Ok(())
    }
}
