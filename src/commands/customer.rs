use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{confirm, truncate, OutputFormat};
use stitchbook::models::Customer;
use stitchbook::Workshop;

#[derive(Args)]
pub struct CustomerCommand {
    #[command(subcommand)]
    pub command: CustomerSubcommand,
}

#[derive(Subcommand)]
pub enum CustomerSubcommand {
    /// Add a new customer
    Add {
        /// Customer's full name
        name: String,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Gender
        #[arg(long)]
        gender: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List all customers
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show names containing this text
        #[arg(long)]
        search: Option<String>,
    },

    /// Show a customer's details
    Show {
        /// Customer ID (UUID) or name
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing customer
    Update {
        /// Customer ID (UUID) or name
        identifier: String,

        /// New full name
        #[arg(long)]
        name: Option<String>,

        /// Phone number
        #[arg(long)]
        phone: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Gender
        #[arg(long)]
        gender: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a customer with their measurements, orders and invoices
    Delete {
        /// Customer ID (UUID) or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl CustomerCommand {
    /// Whether this command changes local data.
    pub fn writes(&self) -> bool {
        !matches!(
            self.command,
            CustomerSubcommand::List { .. } | CustomerSubcommand::Show { .. }
        )
    }

    pub async fn run(&self, workshop: &Workshop) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CustomerSubcommand::Add {
                name,
                phone,
                email,
                gender,
                notes,
            } => {
                if name.trim().is_empty() {
                    return Err("Customer name cannot be empty".into());
                }

                let mut customer = Customer::new(workshop.owner_id(), name.trim());
                if let Some(phone) = phone {
                    customer = customer.with_phone_number(phone);
                }
                if let Some(email) = email {
                    customer = customer.with_email(email);
                }
                if let Some(gender) = gender {
                    customer = customer.with_gender(gender);
                }
                if let Some(notes) = notes {
                    customer = customer.with_notes(notes);
                }

                let created = workshop.add_customer(customer).await?;
                println!("Added customer:");
                println!("{}", created);
                Ok(())
            }

            CustomerSubcommand::List { format, search } => {
                let mut customers: Vec<Customer> = workshop.list().await?;
                if let Some(search) = search {
                    let needle = search.to_lowercase();
                    customers.retain(|c| c.full_name.to_lowercase().contains(&needle));
                }

                if customers.is_empty() {
                    println!("No customers found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&customers)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  PHONE", "ID", "NAME");
                        println!("{}", "-".repeat(84));
                        for customer in &customers {
                            println!(
                                "{:<36}  {:<30}  {}",
                                customer.meta.id,
                                truncate(&customer.full_name, 30),
                                customer.phone_number.as_deref().unwrap_or("-")
                            );
                        }
                        println!("\nTotal: {} customer(s)", customers.len());
                    }
                }
                Ok(())
            }

            CustomerSubcommand::Show { identifier, format } => {
                let customer = find_customer(workshop, identifier).await?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&customer)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", customer);

                        let measurements = workshop.customer_measurements(customer.meta.id).await?;
                        let orders = workshop.customer_orders(customer.meta.id).await?;
                        println!();
                        println!("Measurements: {}", measurements.len());
                        for measurement in &measurements {
                            println!("  - {} ({})", measurement.name, measurement.meta.id);
                        }
                        println!("Orders: {}", orders.len());
                        for order in &orders {
                            println!("  - {} [{}] ({})", order.style, order.status, order.meta.id);
                        }
                    }
                }
                Ok(())
            }

            CustomerSubcommand::Update {
                identifier,
                name,
                phone,
                email,
                gender,
                notes,
            } => {
                let has_updates = name.is_some()
                    || phone.is_some()
                    || email.is_some()
                    || gender.is_some()
                    || notes.is_some();
                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }
                if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                    return Err("Customer name cannot be empty".into());
                }

                let customer = find_customer(workshop, identifier).await?;
                let updated = workshop
                    .update::<Customer, _>(customer.meta.id, |c| {
                        if let Some(name) = name {
                            c.full_name = name.trim().to_string();
                        }
                        if let Some(phone) = phone {
                            c.phone_number = Some(phone.clone());
                        }
                        if let Some(email) = email {
                            c.email = Some(email.clone());
                        }
                        if let Some(gender) = gender {
                            c.gender = Some(gender.clone());
                        }
                        if let Some(notes) = notes {
                            c.notes = Some(notes.clone());
                        }
                    })
                    .await?;

                println!("Updated customer:");
                println!("{}", updated);
                Ok(())
            }

            CustomerSubcommand::Delete { identifier, force } => {
                let customer = find_customer(workshop, identifier).await?;

                if !force
                    && !confirm(&format!(
                        "Delete customer '{}' and all their records?",
                        customer.full_name
                    ))?
                {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                workshop.delete::<Customer>(customer.meta.id).await?;
                println!("Deleted customer: {}", customer.full_name);
                Ok(())
            }
        }
    }
}

/// Looks a customer up by UUID, falling back to an exact (case-insensitive)
/// name match.
pub(crate) async fn find_customer(
    workshop: &Workshop,
    identifier: &str,
) -> Result<Customer, Box<dyn std::error::Error>> {
    let found = if let Ok(id) = Uuid::parse_str(identifier) {
        workshop.get::<Customer>(id).await?
    } else {
        let customers: Vec<Customer> = workshop.list().await?;
        let mut matches: Vec<Customer> = customers
            .into_iter()
            .filter(|c| c.full_name.eq_ignore_ascii_case(identifier))
            .collect();
        if matches.len() > 1 {
            return Err(format!(
                "Several customers are named '{}'. Use the customer ID instead.",
                identifier
            )
            .into());
        }
        matches.pop()
    };

    found.ok_or_else(|| format!("Customer not found: {}", identifier).into())
}
