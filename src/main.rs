//! Entry point: parses the CLI, wires up logging, and dispatches to the
//! lifecycle engine. The runtime is a one-shot command process — each
//! invocation performs a single lifecycle operation and exits.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Clap;

use containeruntime::commands::{attach, create, delete, kill, list, start, state};
use containeruntime::container::Engine;
use containeruntime::logger::{self, LogFormat};

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

#[derive(Clap, Debug)]
#[clap(version = "1.0", author = "utam0k <k0ma@utam0k.jp>")]
struct Opts {
    /// root directory to store container state
    #[clap(short, long, default_value = "/run/containeruntime")]
    root: PathBuf,
    /// file to write logs to; defaults to stderr
    #[clap(short, long)]
    log: Option<PathBuf>,
    /// text or json
    #[clap(long, default_value = "text")]
    log_format: String,
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Clap, Debug)]
enum SubCommand {
    Create(create::Create),
    Start(start::Start),
    Kill(kill::Kill),
    State(state::State),
    Delete(delete::Delete),
    /// not part of the core lifecycle table: reattaches the caller's
    /// terminal to a container created with a PTY
    Attach(attach::Attach),
    /// not part of the core lifecycle table: lists known containers
    List(list::List),
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let log_format = opts
        .log_format
        .parse::<LogFormat>()
        .unwrap_or(LogFormat::Text);
    if let Err(e) = logger::init(opts.log, log_format) {
        eprintln!("log init failed: {:?}", e);
    }

    fs::create_dir_all(&opts.root)?;
    let engine = Engine::new(opts.root, PathBuf::from(DEFAULT_CGROUP_ROOT));

    let result = match &opts.subcmd {
        SubCommand::Create(cmd) => cmd.exec(&engine),
        SubCommand::Start(cmd) => cmd.exec(&engine),
        SubCommand::Kill(cmd) => cmd.exec(&engine),
        SubCommand::State(cmd) => cmd.exec(&engine),
        SubCommand::Delete(cmd) => cmd.exec(&engine),
        SubCommand::Attach(cmd) => cmd.exec(&engine),
        SubCommand::List(cmd) => cmd.exec(&engine),
    };

    if let Err(e) = &result {
        log::error!("{:?}", e);
    }
    result
}
