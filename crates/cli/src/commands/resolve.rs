use crate::app::App;
use crate::error::CommandError;
use audiograb_core::Owner;

pub async fn execute(app: &App, owner: &Owner, file: Option<&str>) -> Result<(), CommandError> {
    let resolved = app.resolver.resolve_file(owner, file).await?;
    tracing::debug!(%owner, file = %resolved.served_filename, "resolved");
    println!("{}", resolved.path.display());
    Ok(())
}
