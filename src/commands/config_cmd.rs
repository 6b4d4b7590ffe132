use clap::{Args, Subcommand};

use super::OutputFormat;
use stitchbook::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("owner_id: {}", config.owner_id.value);
                        println!("  source: {}", config.owner_id.source);
                        println!();

                        println!("sync:");
                        println!(
                            "  server_url: {}",
                            config.sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  api_key: {}",
                            if config.sync.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!("  auto_sync: {}", config.sync.auto_sync);
                        println!("  interval_secs: {}", config.sync.interval_secs);
                        println!(
                            "  request_timeout_secs: {}",
                            config.sync.request_timeout_secs
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
