use clap::{Parser, Subcommand};
use tally_aggregator::unix_now;
use tally_app::ctl::signed_submission;
use tally_app::{AppBuilder, AppError, AppType, TallyClient, TallySettings};
use tally_core::TaskId;
use tally_crypto::OperatorKeypair;
use tally_logging::LogLevel;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "tallyctl")]
#[command(about = "Operator and admin client for a running tallyd")]
struct Args {
    /// Settings file shared with tallyd (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<String>,
    /// Socket to connect to, overriding the settings file
    #[arg(long)]
    socket: Option<String>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an operator keypair and print its address
    Keygen,
    /// Sign a task result and submit it
    Submit {
        #[arg(long)]
        task_id: TaskId,
        #[arg(long, allow_hyphen_values = true)]
        result: i64,
        /// Operator secret key, hex-encoded
        #[arg(long)]
        secret_key: String,
        /// Network to sign for, overriding the settings file
        #[arg(long)]
        network: Option<String>,
    },
    /// Show the daemon's network and version
    Status,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    let mut builder = AppBuilder::<TallySettings>::new("tallyd")
        .app_type(AppType::Cli)
        .log_level(if args.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .skip_banner();
    if let Some(path) = &args.config {
        builder = builder.config_path(path);
    }
    let app = builder.build()?;
    let settings = &app.settings.config;

    let socket = args
        .socket
        .clone()
        .unwrap_or_else(|| settings.socket_path(&app.service));
    let client = TallyClient::new(&socket);
    debug!(socket = client.socket_path(), "using tallyd socket");

    match args.command {
        Command::Keygen => {
            let keypair = OperatorKeypair::generate();
            println!("address:    {}", keypair.address());
            println!("public key: {}", keypair.public_key_hex());
            println!("secret key: {}", keypair.secret_key_hex());
        }
        Command::Submit {
            task_id,
            result,
            secret_key,
            network,
        } => {
            let keypair = OperatorKeypair::from_secret_hex(&secret_key)
                .map_err(|e| AppError::InvalidArgument(format!("secret key: {e}")))?;
            let network = network.unwrap_or_else(|| settings.network_id.clone());
            let submission = signed_submission(&keypair, &network, task_id, result, unix_now());
            let status = client.submit(&submission).await?;
            println!("{}", serde_json::to_string(&status)?);
            if !status.is_success() {
                std::process::exit(1);
            }
        }
        Command::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
