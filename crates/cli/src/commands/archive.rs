use crate::app::App;
use crate::error::CommandError;
use audiograb_core::Owner;
use std::path::Path;

pub async fn execute(app: &App, owner: &Owner, out: &Path) -> Result<(), CommandError> {
    let archive = app.archives.build_archive(owner).await?;
    let name = archive.file_name().to_string();

    // The archive file is removed once streamed, even on failure
    let written = if out == Path::new("-") {
        let mut stdout = tokio::io::stdout();
        archive.stream_to(&mut stdout).await?
    } else {
        let mut file = tokio::fs::File::create(out)
            .await
            .map_err(|e| CommandError::io(&format!("create {}", out.display()), e))?;
        archive.stream_to(&mut file).await?
    };

    tracing::info!("✓ Wrote {name} ({written} bytes)");
    Ok(())
}
