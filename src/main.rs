use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    ConfigCommand, CustomerCommand, InvoiceCommand, MeasurementCommand, OrderCommand,
    SyncCommand, TemplateCommand,
};
use stitchbook::clock::SystemClock;
use stitchbook::config::Config;
use stitchbook::db::open_store;
use stitchbook::Workshop;

#[derive(Parser)]
#[command(name = "stitchbook")]
#[command(version)]
#[command(about = "Customer, measurement and order book for tailoring workshops", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage customers
    Customer(CustomerCommand),

    /// Record and view customer measurements
    Measurement(MeasurementCommand),

    /// Manage measurement templates
    Template(TemplateCommand),

    /// Manage orders
    Order(OrderCommand),

    /// Manage invoices
    Invoice(InvoiceCommand),

    /// Sync with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

impl Commands {
    fn writes(&self) -> bool {
        match self {
            Commands::Customer(cmd) => cmd.writes(),
            Commands::Measurement(cmd) => cmd.writes(),
            Commands::Template(cmd) => cmd.writes(),
            Commands::Order(cmd) => cmd.writes(),
            Commands::Invoice(cmd) => cmd.writes(),
            Commands::Sync(_) | Commands::Config(_) => false,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stitchbook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let store = open_store(&config.database_path.value).await?;
    let workshop = Workshop::new(
        store.clone(),
        Arc::new(SystemClock),
        config.owner_id.value.clone(),
    );

    match &command {
        Commands::Customer(cmd) => cmd.run(&workshop).await?,
        Commands::Measurement(cmd) => cmd.run(&workshop).await?,
        Commands::Template(cmd) => cmd.run(&workshop).await?,
        Commands::Order(cmd) => cmd.run(&workshop).await?,
        Commands::Invoice(cmd) => cmd.run(&workshop).await?,
        Commands::Sync(cmd) => cmd.run(&workshop, &config).await?,
        Commands::Config(cmd) => cmd.run(&config)?,
    }

    if command.writes() {
        commands::auto_sync(&store, &config).await;
    }

    Ok(())
}
