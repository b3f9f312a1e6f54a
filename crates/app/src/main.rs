use clap::Parser;
use tally_app::{AppBuilder, AppError, AppType, TallySettings};

#[derive(Parser, Debug)]
#[command(name = "tallyd")]
#[command(about = "Collects signed operator results and finalizes tasks")]
struct Args {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<String>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    let mut builder = AppBuilder::<TallySettings>::new("tallyd")
        .app_type(AppType::Daemon)
        .verbose(args.verbose);
    if let Some(path) = &args.config {
        builder = builder.config_path(path);
    }
    let app = builder.build()?;

    tally_app::daemon::run(app).await
}
