mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();

    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        // Help and version requests exit 0 through clap.
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => return Err(err.into()),
    };
    cli::dispatch(cli)
}
