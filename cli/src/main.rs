mod commands;
mod util;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::golden::GoldenArgs;
use commands::run::RunArgs;
use commands::validate::ValidateArgs;

#[derive(Parser)]
#[command(name = "cardflow", version, about = "Cardflow CLI for golden session replay and snapshot checks")]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "CARDFLOW_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay every fixture and compare against stored snapshots
    Golden(GoldenArgs),
    /// Replay a single fixture and print its projection
    Run(RunArgs),
    /// Check invariants of a stored snapshot
    Validate(ValidateArgs),
}

fn init_tracing(log_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cardflow_golden=info,cardflow_core=warn".into());
    let json = log_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let plain = (!log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let code = match cli.command {
        Commands::Golden(args) => commands::golden::run(args),
        Commands::Run(args) => commands::run::run(args),
        Commands::Validate(args) => commands::validate::run(args),
    };
    std::process::exit(code);
}
