use audiograb::{App, Cli};
use audiograb_core::ConfigLoader;
use clap::Parser;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    audiograb_utils::tracing::init().map_err(|e| eyre::eyre!(e))?;

    let result = async {
        let mut config = ConfigLoader::load()?;
        if let Some(root) = cli.root {
            config.root_dir = root;
        }

        let app = App::start(config)?;
        let result = cli.command.execute(&app).await;
        app.shutdown().await;
        result
    }
    .await;

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
    Ok(())
}
