use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use wms_sync::cli::{Cli, Commands};
use wms_sync::wiring;
use wms_sync_core::{SyncConfig, SyncScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let mut cfg = SyncConfig::from_env()?;
    cli.apply(&mut cfg);
    cfg.validate()?;
    wms_sync_core::o11y::init_global(&cfg.log)?;

    let store = wiring::open_store(&cfg).await?;

    let Some(mode) = cli.mode(&cfg) else {
        match cli.command {
            Some(Commands::Bootstrap) => {
                tracing::info!(path = %cfg.store.path.display(), "local store ready");
            }
            Some(Commands::Mappings) => {
                let mappings = wiring::build_resolver(&cfg, &store)?.resolve_all().await;
                for (name, mapping) in [
                    ("orders", &mappings.orders),
                    ("products", &mappings.products),
                    ("order_items", &mappings.order_items),
                ] {
                    let fields: Vec<&str> = mapping.mapping().fields().collect();
                    println!("{name}: {} [{}]", mapping.describe(), fields.join(", "));
                }
            }
            _ => {}
        }
        return Ok(ExitCode::SUCCESS);
    };

    let cycle = Arc::new(wiring::build_cycle(&cfg, &store)?);
    let scheduler = SyncScheduler::new(cycle, mode, cfg.schedule.serve.clone())?;

    // Ctrl-C only takes effect between cycles; the scheduler never cancels a
    // cycle in progress.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    let outcome = scheduler.run(shutdown_rx).await?;
    tracing::info!(cycles = outcome.cycles, "sync finished");

    let connection_failed = outcome
        .last
        .as_ref()
        .is_some_and(|s| s.aborted_on_connection());
    if matches!(mode, wms_sync_core::SyncMode::Once) && connection_failed {
        return Ok(ExitCode::FAILURE);
    }
    if let Some(status) = outcome.served_exit
        && !status.success()
    {
        tracing::warn!(%status, "served process exited with failure");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
