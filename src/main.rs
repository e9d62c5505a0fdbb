use clap::Parser;
use tierflow::cli::{self, Cli, Commands, ConfigCommands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(&args).await,
        Commands::History(args) => cli::history::handle_history(&args).await,
        Commands::Stats(args) => cli::history::handle_stats(&args).await,
        Commands::Quality(args) => cli::quality::handle_quality(&args).await,
        Commands::Import(args) => cli::history::handle_import(&args).await,
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Init(args) => cli::handle_config_init(&args),
        },
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
