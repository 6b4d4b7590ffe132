use clap::{Args, Subcommand};

use super::customer::find_customer;
use super::template::find_template;
use super::{confirm, parse_id, parse_value_pair, OutputFormat};
use stitchbook::models::Measurement;
use stitchbook::Workshop;

#[derive(Args)]
pub struct MeasurementCommand {
    #[command(subcommand)]
    pub command: MeasurementSubcommand,
}

#[derive(Subcommand)]
pub enum MeasurementSubcommand {
    /// Record a set of measurements for a customer
    Add {
        /// Customer ID (UUID) or name
        customer: String,

        /// Name of the measurement set (e.g. "Trouser")
        name: String,

        /// A measurement as LABEL=VALUE (can be repeated)
        #[arg(long = "value", value_name = "LABEL=VALUE")]
        values: Vec<String>,

        /// Template whose labels every value must come from
        #[arg(long)]
        template: Option<String>,

        /// Unit of measurement
        #[arg(long)]
        unit: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List a customer's measurements
    List {
        /// Customer ID (UUID) or name
        customer: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a measurement set
    Show {
        /// Measurement ID (UUID)
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update a measurement set
    Update {
        /// Measurement ID (UUID)
        id: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// Set a measurement as LABEL=VALUE (can be repeated)
        #[arg(long = "set", value_name = "LABEL=VALUE")]
        set: Vec<String>,

        /// Remove a measurement label (can be repeated)
        #[arg(long = "remove", value_name = "LABEL")]
        remove: Vec<String>,

        /// Unit of measurement
        #[arg(long)]
        unit: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a measurement set
    Delete {
        /// Measurement ID (UUID)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl MeasurementCommand {
    pub fn writes(&self) -> bool {
        !matches!(
            self.command,
            MeasurementSubcommand::List { .. } | MeasurementSubcommand::Show { .. }
        )
    }

    pub async fn run(&self, workshop: &Workshop) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            MeasurementSubcommand::Add {
                customer,
                name,
                values,
                template,
                unit,
                notes,
            } => {
                if name.trim().is_empty() {
                    return Err("Measurement name cannot be empty".into());
                }

                let customer = find_customer(workshop, customer).await?;
                let mut measurement =
                    Measurement::new(workshop.owner_id(), customer.meta.id, name.trim());
                for pair in values {
                    let (label, value) = parse_value_pair(pair)?;
                    measurement = measurement.with_value(label, value);
                }

                if let Some(template) = template {
                    let template = find_template(workshop, template).await?;
                    if let Some(label) = measurement
                        .values
                        .keys()
                        .find(|label| !template.fields.contains(*label))
                    {
                        return Err(format!(
                            "'{}' is not a field of template '{}' ({})",
                            label,
                            template.name,
                            template.fields.join(", ")
                        )
                        .into());
                    }
                }
                if let Some(unit) = unit {
                    measurement = measurement.with_unit(unit);
                }
                if let Some(notes) = notes {
                    measurement = measurement.with_notes(notes);
                }

                let created = workshop.add_measurement(measurement).await?;
                println!("Recorded measurements for {}:", customer.full_name);
                println!("{}", created);
                Ok(())
            }

            MeasurementSubcommand::List { customer, format } => {
                let customer = find_customer(workshop, customer).await?;
                let measurements = workshop.customer_measurements(customer.meta.id).await?;

                if measurements.is_empty() {
                    println!("No measurements found for {}", customer.full_name);
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&measurements)?);
                    }
                    OutputFormat::Text => {
                        for measurement in &measurements {
                            println!("[{}]", measurement.meta.id);
                            println!("{}", measurement);
                        }
                        println!("Total: {} measurement set(s)", measurements.len());
                    }
                }
                Ok(())
            }

            MeasurementSubcommand::Show { id, format } => {
                let id = parse_id("measurement", id)?;
                let measurement = workshop
                    .get::<Measurement>(id)
                    .await?
                    .ok_or_else(|| format!("Measurement not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&measurement)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", measurement);
                    }
                }
                Ok(())
            }

            MeasurementSubcommand::Update {
                id,
                name,
                set,
                remove,
                unit,
                notes,
            } => {
                let has_updates = name.is_some()
                    || !set.is_empty()
                    || !remove.is_empty()
                    || unit.is_some()
                    || notes.is_some();
                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let id = parse_id("measurement", id)?;
                let pairs = set
                    .iter()
                    .map(|pair| parse_value_pair(pair))
                    .collect::<Result<Vec<_>, _>>()?;

                let updated = workshop
                    .update::<Measurement, _>(id, |m| {
                        if let Some(name) = name {
                            m.name = name.clone();
                        }
                        for (label, value) in pairs {
                            m.values.insert(label, value);
                        }
                        for label in remove {
                            m.values.remove(label);
                        }
                        if let Some(unit) = unit {
                            m.unit = unit.clone();
                        }
                        if let Some(notes) = notes {
                            m.notes = Some(notes.clone());
                        }
                    })
                    .await?;

                println!("Updated measurements:");
                println!("{}", updated);
                Ok(())
            }

            MeasurementSubcommand::Delete { id, force } => {
                let id = parse_id("measurement", id)?;
                let measurement = workshop
                    .get::<Measurement>(id)
                    .await?
                    .ok_or_else(|| format!("Measurement not found: {}", id))?;

                if !force && !confirm(&format!("Delete measurements '{}'?", measurement.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                workshop.delete::<Measurement>(id).await?;
                println!("Deleted measurements: {}", measurement.name);
                Ok(())
            }
        }
    }
}
