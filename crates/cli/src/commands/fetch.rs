use crate::app::App;
use crate::error::CommandError;
use audiograb_core::{FetchRequest, Owner};
use audiograb_fetch::SourceKind;

pub async fn execute(
    app: &App,
    url: String,
    owner: Owner,
    source: Option<SourceKind>,
) -> Result<(), CommandError> {
    let request = FetchRequest::new(url, owner);
    let outcome = match source {
        Some(source) => app.service.fetch(&request, source).await?,
        None => app.service.fetch_detected(&request).await?,
    };

    let origin = if outcome.cache_hit { "from cache" } else { "fetched" };
    tracing::info!("✓ {} ({origin})", outcome.served_filename);
    let path = outcome.stored_path.unwrap_or(outcome.file_path);
    println!("{}", path.display());
    Ok(())
}
