use crate::app::App;
use crate::error::CommandError;
use audiograb_core::Owner;
use audiograb_fetch::SourceKind;
use clap::Subcommand;
use std::path::PathBuf;

pub mod archive;
pub mod cache;
pub mod fetch;
pub mod history;
pub mod resolve;

use self::cache::CacheCommands;
use self::history::HistoryCommands;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a media URL into the owner's storage
    #[command(visible_alias = "f")]
    Fetch {
        /// Spotify, YouTube or SoundCloud URL
        url: String,

        /// Owner namespace (shared when omitted)
        #[arg(short, long)]
        owner: Option<String>,

        /// Source of the URL; detected from the host when omitted
        #[arg(short, long)]
        source: Option<SourceKind>,
    },

    /// Print the path of the file to serve for an owner
    Resolve {
        #[arg(short, long)]
        owner: Option<String>,

        /// Exact filename inside the owner's folder
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Bundle an owner's media into a zip archive
    Archive {
        #[arg(short, long)]
        owner: Option<String>,

        /// Destination file, or `-` for stdout
        #[arg(long, value_name = "PATH")]
        out: PathBuf,
    },

    /// Remove expired cache entries and stale archives now
    Sweep,

    /// Inspect or clear download history
    #[command(subcommand)]
    History(HistoryCommands),

    /// Inspect or clear the media cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

impl Commands {
    pub async fn execute(self, app: &App) -> Result<(), CommandError> {
        match self {
            Commands::Fetch { url, owner, source } => {
                fetch::execute(app, url, parse_owner(owner.as_deref())?, source).await
            }
            Commands::Resolve { owner, file } => {
                resolve::execute(app, &parse_owner(owner.as_deref())?, file.as_deref()).await
            }
            Commands::Archive { owner, out } => {
                archive::execute(app, &parse_owner(owner.as_deref())?, &out).await
            }
            Commands::Sweep => {
                let report = app.sweeper.run_once();
                tracing::info!(
                    "✓ Sweep finished: {} evicted, {} failed, {} archives pruned",
                    report.evicted,
                    report.failed,
                    report.archives_pruned
                );
                Ok(())
            }
            Commands::History(command) => command.execute(app).await,
            Commands::Cache(command) => command.execute(app),
        }
    }
}

pub(crate) fn parse_owner(raw: Option<&str>) -> Result<Owner, CommandError> {
    Ok(Owner::parse(raw)?)
}
