use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wms_sync_core::{SyncConfig, SyncMode};

#[derive(Debug, Parser)]
#[command(name = "wms-sync", version, about = "ERP to WMS order sync")]
pub struct Cli {
    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Local SQLite database path (overrides WMS_SYNC_DATABASE_PATH).
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Extraction query file (overrides WMS_SYNC_QUERY_PATH).
    #[arg(long, global = true)]
    pub query: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run a single sync cycle and exit (default if no subcommand given).
    Once,

    /// Run sync cycles forever with a fixed sleep between them.
    Loop {
        /// Seconds between the end of one cycle and the start of the next.
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Sync periodically in the background while running the served process.
    Serve {
        #[arg(long)]
        interval: Option<u64>,

        /// Command line of the served process (overrides WMS_SYNC_SERVE_COMMAND).
        #[arg(long)]
        command: Option<String>,

        /// PORT handed to the served process.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create or upgrade the local store schema, then exit.
    Bootstrap,

    /// Print the field mapping each dataset resolves to.
    Mappings,
}

impl Cli {
    /// Fold command-line overrides into the environment-derived config.
    pub fn apply(&self, cfg: &mut SyncConfig) {
        if self.quiet {
            cfg.log.quiet = true;
        }
        if let Some(path) = &self.database {
            cfg.store.path = path.clone();
        }
        if let Some(path) = &self.query {
            cfg.remote.query_path = path.clone();
        }
        match &self.command {
            Some(Commands::Loop {
                interval: Some(secs),
            }) => cfg.schedule.interval = std::time::Duration::from_secs(*secs),
            Some(Commands::Serve {
                interval,
                command,
                port,
            }) => {
                if let Some(secs) = interval {
                    cfg.schedule.interval = std::time::Duration::from_secs(*secs);
                }
                if let Some(command) = command {
                    cfg.schedule.serve.command = command.clone();
                }
                if let Some(port) = port {
                    cfg.schedule.serve.port = *port;
                }
            }
            _ => {}
        }
    }

    /// Scheduler mode for the sync subcommands; `None` for maintenance ones.
    pub fn mode(&self, cfg: &SyncConfig) -> Option<SyncMode> {
        match self.command.as_ref().unwrap_or(&Commands::Once) {
            Commands::Once => Some(SyncMode::Once),
            Commands::Loop { .. } => Some(SyncMode::Loop {
                interval: cfg.schedule.interval,
            }),
            Commands::Serve { .. } => Some(SyncMode::Serve {
                interval: cfg.schedule.interval,
            }),
            Commands::Bootstrap | Commands::Mappings => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn no_subcommand_is_one_shot() {
        let cli = Cli::parse_from(["wms-sync"]);
        let cfg = SyncConfig::default();
        assert_eq!(cli.mode(&cfg), Some(SyncMode::Once));
        assert!(!cli.quiet);
    }

    #[test]
    fn loop_interval_overrides_config() {
        let cli = Cli::parse_from(["wms-sync", "--quiet", "loop", "--interval", "60"]);
        let mut cfg = SyncConfig::default();
        cli.apply(&mut cfg);
        assert!(cfg.log.quiet);
        assert_eq!(
            cli.mode(&cfg),
            Some(SyncMode::Loop {
                interval: Duration::from_secs(60)
            })
        );
    }

    #[test]
    fn serve_without_interval_uses_default() {
        let cli = Cli::parse_from(["wms-sync", "serve", "--command", "node server.js"]);
        let mut cfg = SyncConfig::default();
        cli.apply(&mut cfg);
        assert_eq!(cfg.schedule.serve.command, "node server.js");
        assert_eq!(
            cli.mode(&cfg),
            Some(SyncMode::Serve {
                interval: Duration::from_secs(300)
            })
        );
    }

    #[test]
    fn global_paths_apply_after_subcommand() {
        let cli = Cli::parse_from([
            "wms-sync",
            "once",
            "--database",
            "/tmp/x.db",
            "--query",
            "q.sql",
        ]);
        let mut cfg = SyncConfig::default();
        cli.apply(&mut cfg);
        assert_eq!(cfg.store.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.remote.query_path, PathBuf::from("q.sql"));
    }

    #[test]
    fn maintenance_commands_have_no_mode() {
        let cli = Cli::parse_from(["wms-sync", "bootstrap"]);
        assert_eq!(cli.mode(&SyncConfig::default()), None);
    }
}
