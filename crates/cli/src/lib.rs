pub mod app;
pub mod commands;
pub mod error;

pub use app::App;
pub use commands::Commands;
pub use error::CommandError;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "audiograb")]
#[command(about = "Fetch media URLs into per-user audio storage", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Root directory for downloads, cache and history
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}
