use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use vmpack::common::init_logging;
use vmpack::config::{Config, DEFAULT_CONFIG_PATH};
use vmpack::db::Database;

#[derive(Parser)]
#[command(name = "vmpackd", about = "Dynamic VM consolidation controller")]
struct Cli {
    /// Path of the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cluster-wide global manager service.
    GlobalManager,
    /// Run the per-host local manager loop.
    LocalManager,
    /// Run the per-host data collector loop.
    DataCollector,
    /// Run the database cleaner loop.
    DbCleaner,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("cannot load configuration from {}", cli.config))?;
    config.validate()?;

    match cli.command {
        Command::GlobalManager => {
            init_logging(&config.log_directory, "global-manager.log", config.log_level)?;
            vmpack::global_manager::run(config)?;
        }
        Command::LocalManager => {
            init_logging(&config.log_directory, "local-manager.log", config.log_level)?;
            let hypervisor = open_hypervisor()?;
            let mut manager = vmpack::local_manager::LocalManager::new(config, hypervisor)?;
            manager.run();
        }
        Command::DataCollector => {
            init_logging(&config.log_directory, "data-collector.log", config.log_level)?;
            let hypervisor = open_hypervisor()?;
            let db = Database::open(&config.sql_connection)?;
            let mut collector = vmpack::collector::DataCollector::new(&config, db, hypervisor)?;
            collector.run();
        }
        Command::DbCleaner => {
            init_logging(&config.log_directory, "db-cleaner.log", config.log_level)?;
            let db = Database::open(&config.sql_connection)?;
            let mut cleaner = vmpack::db_cleaner::DbCleaner::new(
                db,
                config.db_cleaner_interval,
                config.db_cleaner_retention,
            );
            cleaner.run();
        }
    }
    Ok(())
}

#[cfg(feature = "libvirt")]
fn open_hypervisor() -> anyhow::Result<Box<dyn vmpack::hypervisor::Hypervisor>> {
    Ok(Box::new(vmpack::hypervisor::LibvirtHypervisor::open()?))
}

#[cfg(not(feature = "libvirt"))]
fn open_hypervisor() -> anyhow::Result<Box<dyn vmpack::hypervisor::Hypervisor>> {
    bail!("this build has no hypervisor support; rebuild with --features libvirt")
}
