use crate::app::App;
use crate::commands::parse_owner;
use crate::error::CommandError;
use audiograb_core::{HistoryRecord, RecordId};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    /// List download attempts, newest first
    List {
        #[arg(short, long)]
        owner: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show success and failure counts
    Stats {
        #[arg(short, long)]
        owner: Option<String>,
    },
    /// Delete one record, or all of the owner's records
    Clear {
        #[arg(short, long)]
        owner: Option<String>,

        /// Only delete this record
        #[arg(long)]
        id: Option<u64>,
    },
}

impl HistoryCommands {
    pub async fn execute(self, app: &App) -> Result<(), CommandError> {
        match self {
            HistoryCommands::List {
                owner,
                limit,
                offset,
                json,
            } => {
                let owner = parse_owner(owner.as_deref())?;
                let records = app.history.list(&owner, limit, offset).await?;
                if json {
                    let rendered = serde_json::to_string_pretty(&records).map_err(|e| {
                        CommandError::io("render history", std::io::Error::other(e))
                    })?;
                    println!("{rendered}");
                } else {
                    for record in &records {
                        println!("{}", format_record(record));
                    }
                }
                Ok(())
            }
            HistoryCommands::Stats { owner } => {
                let owner = parse_owner(owner.as_deref())?;
                let stats = app.history.stats(&owner).await?;
                tracing::info!("Download history for {owner}:");
                tracing::info!("  Total: {}", stats.total);
                tracing::info!("  Successful: {}", stats.successful);
                tracing::info!("  Failed: {}", stats.failed);
                Ok(())
            }
            HistoryCommands::Clear { owner, id } => {
                let owner = parse_owner(owner.as_deref())?;
                let removed = app.history.clear(&owner, id.map(RecordId)).await?;
                tracing::info!("✓ Removed {removed} history records");
                Ok(())
            }
        }
    }
}

/// `<id>  <timestamp>  <status>  <filename or error>  <url>`
fn format_record(record: &HistoryRecord) -> String {
    let detail = record
        .filename
        .as_deref()
        .or(record.error_message.as_deref())
        .unwrap_or("-");
    format!(
        "{:>5}  {}  {:<7}  {}  {}",
        record.id.0,
        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
        record.status.to_string(),
        detail,
        record.url
    )
}
