use clap::Parser;
use negapedia_preprocessor::config::{self, Cli, Command};
use negapedia_preprocessor::pipeline;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    config::init_tracing(args.verbose);

    pipeline::run(&args)?;
    Ok(())
}
