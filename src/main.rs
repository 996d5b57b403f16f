use clap::Parser;
use subcommands::Subcommand;
use tracing::error;

mod apis;
mod config;
mod normalize;
mod pipeline;
mod subcommands;
mod table;
mod utils;
mod week;

#[derive(Parser, Debug)]
#[command(name = "adsheet", about = "Syncs weekly ad metrics into a Google Sheets datastore")]
struct CliArgs {
    /// The command to perform.
    #[command(subcommand)]
    command: Subcommand,
}

fn main() {
    // set up tracing
    tracing_subscriber::fmt::init();

    let CliArgs { command } = CliArgs::parse();

    let result = match command {
        Subcommand::Social(args) => subcommands::social::main(args),
        Subcommand::Analytics(args) => subcommands::analytics::main(args),
        Subcommand::Export(args) => subcommands::export::main(args),
    };
    if let Err(err) = result {
        error!("error during execution: {:#}", err);
        std::process::exit(1);
    }
}
