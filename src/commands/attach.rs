//! Additive `attach` subcommand (not part of the core OCI lifecycle table):
//! bridges the caller's terminal to a running container's PTY, the way a
//! higher-level tool would reopen the console after `create`+`start` instead
//! of holding a socket open across both.

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::Engine;
use crate::tty;

#[derive(Clap, Debug)]
pub struct Attach {
    #[clap(forbid_empty_values = true, required = true)]
    pub container_id: String,
}

impl Attach {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        let state = engine
            .state(&self.container_id)
            .with_context(|| format!("failed to look up container {}", self.container_id))?;
        tty::attach(&state)
            .with_context(|| format!("failed to attach to container {}", self.container_id))
    }
}
