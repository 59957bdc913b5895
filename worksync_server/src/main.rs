use clap::Parser;
use std::sync::Arc;
use worksync_core::{ConnectionInput, SourceSettings, SyncConfig};
use worksync_server::cli::{Cli, Commands};
use worksync_server::server;
use worksync_server::source::UnconfiguredSourceClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = SyncConfig::from_env()?;
    if let Some(path) = cli.database {
        cfg.database_path = path;
    }
    worksync_core::o11y::init_tracing(&cfg.log)?;

    let cmd = cli.command.unwrap_or(Commands::Serve { addr: None });

    match cmd {
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                cfg.http_addr = addr;
            }
            // This binary carries no tracker transport; scheduled passes could only fail.
            if cfg.scheduler_enabled {
                tracing::warn!(
                    "no source client configured; daily scheduler disabled for this process"
                );
                cfg.scheduler_enabled = false;
            }
            cfg.validate()?;
            let state = server::build_state(&cfg, Arc::new(UnconfiguredSourceClient)).await?;
            server::serve(&cfg, state).await?;
        }
        Commands::Status => {
            let state = server::build_state(&cfg, Arc::new(UnconfiguredSourceClient)).await?;
            let status = state.sync.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Configure {
            organization,
            project,
            area_path,
            team_name,
            team_id,
            disabled,
            base_url,
        } => {
            let state = server::build_state(&cfg, Arc::new(UnconfiguredSourceClient)).await?;
            let connection = state
                .sync
                .configure_connection(
                    ConnectionInput {
                        organization,
                        project,
                        area_path,
                        team_name,
                        team_id,
                        enabled: !disabled,
                    },
                    state.clock.now(),
                )
                .await?;
            if base_url.is_some() {
                state
                    .sync
                    .set_source_settings(SourceSettings { base_url })
                    .await?;
            }
            tracing::info!(connection_id = %connection.id, "connection configured");
            println!("{}", serde_json::to_string_pretty(&connection)?);
        }
    }

    Ok(())
}
