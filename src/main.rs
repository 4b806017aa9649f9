//! TabTransformer - Main Entry Point

use clap::Parser;
use tabtransformer::cli::{cmd_info, cmd_params, cmd_train, Cli, Commands, TrainArgs};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabtransformer=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data,
            target,
            problem_type,
            params,
            column_types,
            infer_types,
            epochs,
            pretrain_epochs,
            val_fraction,
            seed,
            report,
        } => {
            cmd_train(TrainArgs {
                data: &data,
                target: &target,
                problem_type: problem_type.as_deref(),
                params: params.as_deref(),
                column_types: column_types.as_deref(),
                infer_types,
                epochs,
                pretrain_epochs,
                val_fraction,
                seed,
                report: report.as_deref(),
            })?;
        }
        Commands::Params {
            problem_type,
            nunique,
        } => {
            cmd_params(&problem_type, nunique)?;
        }
        Commands::Info { data } => {
            cmd_info(&data)?;
        }
    }

    Ok(())
}
