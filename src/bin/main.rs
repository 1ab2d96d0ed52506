use std::process::ExitCode;

use structopt::StructOpt;

use gelf_proxy::cli::{self, Cli, CliError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::from_args();
    cli::init_logging(&cli);

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("error: {}", message);
            ExitCode::from(2)
        }
        Err(err @ CliError::Runtime(_)) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
