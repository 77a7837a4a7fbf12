use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

use crate::view::TaskView;

#[derive(Debug, Parser)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Command,

    #[clap(
        short,
        long,
        default_value = "/etc/teskube/config.yaml",
        global = true
    )]
    pub(crate) config: PathBuf,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Command {
    /// Drive one task to completion from inside its taskmaster pod.
    Run {
        /// Task document: plain JSON, gzipped, or base64-wrapped gzip.
        payload: PathBuf,
    },
    /// Print one task reassembled from the cluster.
    Get {
        id: String,

        #[clap(short, long, value_enum, default_value = "minimal")]
        view: TaskView,
    },
    /// Print a page of tasks from the namespace.
    List {
        #[clap(long)]
        page_size: Option<u32>,

        #[clap(long)]
        page_token: Option<String>,

        #[clap(short, long, value_enum, default_value = "minimal")]
        view: TaskView,
    },
}
