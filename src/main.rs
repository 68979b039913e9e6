use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    storyloom::logging::init("info").context("init logging")?;

    let cli = storyloom::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        storyloom::cli::Command::Generate(args) => {
            storyloom::generate::generate(args)
                .await
                .context("generate")?;
        }
        storyloom::cli::Command::Show(args) => {
            storyloom::generate::show(args).await.context("show")?;
        }
        storyloom::cli::Command::List(args) => {
            storyloom::generate::list(args).await.context("list")?;
        }
    }

    Ok(())
}
