//! Additive `list` subcommand (not part of the core OCI lifecycle table):
//! tab-formats every known container's state record.

use std::io::{self, Write};

use anyhow::Result;
use clap::Clap;
use tabwriter::TabWriter;

use crate::container::Engine;

#[derive(Clap, Debug)]
pub struct List {}

impl List {
    pub fn exec(&self, engine: &Engine) -> Result<()> {
        let states = engine.list()?;

        let mut tab_writer = TabWriter::new(io::stdout());
        writeln!(&mut tab_writer, "ID\tPID\tSTATUS\tBUNDLE")?;
        for state in states {
            writeln!(
                &mut tab_writer,
                "{}\t{}\t{}\t{}",
                state.id, state.pid, state.status, state.bundle
            )?;
        }
        tab_writer.flush()?;
        Ok(())
    }
}
