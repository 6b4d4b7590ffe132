use clap::{Args, Subcommand};

use super::customer::find_customer;
use super::{confirm, parse_date, parse_id, OutputFormat};
use stitchbook::models::{Invoice, InvoiceStatus, Order};
use stitchbook::Workshop;

#[derive(Args)]
pub struct InvoiceCommand {
    #[command(subcommand)]
    pub command: InvoiceSubcommand,
}

#[derive(Subcommand)]
pub enum InvoiceSubcommand {
    /// Issue an invoice for an order
    Add {
        /// Order ID (UUID)
        order: String,

        /// Invoice number (generated when omitted)
        #[arg(long)]
        number: Option<String>,

        /// Amount to invoice (defaults to the order's outstanding balance)
        #[arg(long)]
        amount: Option<f64>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List invoices
    List {
        /// Only invoices of this order (UUID)
        #[arg(long)]
        order: Option<String>,

        /// Only invoices of this customer (ID or name)
        #[arg(long)]
        customer: Option<String>,

        /// Only invoices with this status (unpaid, paid)
        #[arg(long)]
        status: Option<InvoiceStatus>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Mark an invoice as paid
    Pay {
        /// Invoice ID (UUID)
        id: String,
    },

    /// Update an invoice
    Update {
        /// Invoice ID (UUID)
        id: String,

        /// Amount
        #[arg(long)]
        amount: Option<f64>,

        /// Status (unpaid, paid)
        #[arg(long)]
        status: Option<InvoiceStatus>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete an invoice
    Delete {
        /// Invoice ID (UUID)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl InvoiceCommand {
    pub fn writes(&self) -> bool {
        !matches!(self.command, InvoiceSubcommand::List { .. })
    }

    pub async fn run(&self, workshop: &Workshop) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            InvoiceSubcommand::Add {
                order,
                number,
                amount,
                due,
                notes,
            } => {
                let order_id = parse_id("order", order)?;
                let order = workshop
                    .get::<Order>(order_id)
                    .await?
                    .ok_or_else(|| format!("Order not found: {}", order_id))?;

                let number = match number {
                    Some(number) if !number.trim().is_empty() => number.trim().to_string(),
                    Some(_) => return Err("Invoice number cannot be empty".into()),
                    None => next_invoice_number(&workshop.list::<Invoice>().await?),
                };

                let mut invoice = Invoice::new(
                    workshop.owner_id(),
                    order.customer_id,
                    order.meta.id,
                    number,
                )
                .with_amount(amount.unwrap_or_else(|| order.balance().max(0.0)));
                if let Some(due) = due {
                    invoice = invoice.with_due_date(parse_date(due)?);
                }
                if let Some(notes) = notes {
                    invoice = invoice.with_notes(notes);
                }

                let created = workshop.add_invoice(invoice).await?;
                println!("Issued invoice {}", created);
                println!("ID: {}", created.meta.id);
                Ok(())
            }

            InvoiceSubcommand::List {
                order,
                customer,
                status,
                format,
            } => {
                let mut invoices: Vec<Invoice> = match order {
                    Some(order) => {
                        workshop
                            .order_invoices(parse_id("order", order)?)
                            .await?
                    }
                    None => workshop.list().await?,
                };
                if let Some(customer) = customer {
                    let customer = find_customer(workshop, customer).await?;
                    invoices.retain(|i| i.customer_id == customer.meta.id);
                }
                if let Some(status) = status {
                    invoices.retain(|i| i.status == *status);
                }

                if invoices.is_empty() {
                    println!("No invoices found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&invoices)?);
                    }
                    OutputFormat::Text => {
                        for invoice in &invoices {
                            println!("{}  {}", invoice.meta.id, invoice);
                        }
                        let outstanding: f64 = invoices
                            .iter()
                            .filter(|i| i.status == InvoiceStatus::Unpaid)
                            .map(|i| i.amount)
                            .sum();
                        println!(
                            "\nTotal: {} invoice(s), {:.2} outstanding",
                            invoices.len(),
                            outstanding
                        );
                    }
                }
                Ok(())
            }

            InvoiceSubcommand::Pay { id } => {
                let id = parse_id("invoice", id)?;
                let updated = workshop
                    .update::<Invoice, _>(id, |i| i.status = InvoiceStatus::Paid)
                    .await?;
                println!("Marked invoice #{} as paid", updated.invoice_number);
                Ok(())
            }

            InvoiceSubcommand::Update {
                id,
                amount,
                status,
                due,
                notes,
            } => {
                if amount.is_none() && status.is_none() && due.is_none() && notes.is_none() {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let id = parse_id("invoice", id)?;
                let due_date = due.as_deref().map(parse_date).transpose()?;
                let updated = workshop
                    .update::<Invoice, _>(id, |i| {
                        if let Some(amount) = amount {
                            i.amount = *amount;
                        }
                        if let Some(status) = status {
                            i.status = *status;
                        }
                        if due_date.is_some() {
                            i.due_date = due_date;
                        }
                        if let Some(notes) = notes {
                            i.notes = Some(notes.clone());
                        }
                    })
                    .await?;

                println!("Updated invoice {}", updated);
                Ok(())
            }

            InvoiceSubcommand::Delete { id, force } => {
                let id = parse_id("invoice", id)?;
                let invoice = workshop
                    .get::<Invoice>(id)
                    .await?
                    .ok_or_else(|| format!("Invoice not found: {}", id))?;

                if !force && !confirm(&format!("Delete invoice #{}?", invoice.invoice_number))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                workshop.delete::<Invoice>(id).await?;
                println!("Deleted invoice #{}", invoice.invoice_number);
                Ok(())
            }
        }
    }
}

/// Next `INV-NNNN` number after the highest one already issued.
fn next_invoice_number(existing: &[Invoice]) -> String {
    let highest = existing
        .iter()
        .filter_map(|i| i.invoice_number.strip_prefix("INV-"))
        .filter_map(|n| n.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("INV-{:04}", highest + 1)
}
