use clap::{Args, Subcommand};

use super::customer::find_customer;
use super::{confirm, parse_date, parse_id, truncate, OutputFormat};
use stitchbook::models::{Order, OrderStatus};
use stitchbook::Workshop;

#[derive(Args)]
pub struct OrderCommand {
    #[command(subcommand)]
    pub command: OrderSubcommand,
}

#[derive(Subcommand)]
pub enum OrderSubcommand {
    /// Take a new order for a customer
    Add {
        /// Customer ID (UUID) or name
        customer: String,

        /// Garment style (e.g. "Agbada")
        style: String,

        /// Description of the work
        #[arg(long)]
        description: Option<String>,

        /// Agreed price
        #[arg(long)]
        amount: Option<f64>,

        /// Deposit already paid
        #[arg(long)]
        paid: Option<f64>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// List orders
    List {
        /// Only orders of this customer (ID or name)
        #[arg(long)]
        customer: Option<String>,

        /// Only orders with this status
        #[arg(long)]
        status: Option<OrderStatus>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show an order
    Show {
        /// Order ID (UUID)
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an order
    Update {
        /// Order ID (UUID)
        id: String,

        /// Garment style
        #[arg(long)]
        style: Option<String>,

        /// Description of the work
        #[arg(long)]
        description: Option<String>,

        /// Agreed price
        #[arg(long)]
        amount: Option<f64>,

        /// Total amount paid so far
        #[arg(long)]
        paid: Option<f64>,

        /// Status (pending, in_progress, ready, delivered, cancelled)
        #[arg(long)]
        status: Option<OrderStatus>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete an order and its invoices
    Delete {
        /// Order ID (UUID)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

fn check_amount(label: &str, amount: Option<f64>) -> Result<(), String> {
    match amount {
        Some(value) if !value.is_finite() || value < 0.0 => {
            Err(format!("{} must be a non-negative number", label))
        }
        _ => Ok(()),
    }
}

impl OrderCommand {
    pub fn writes(&self) -> bool {
        !matches!(
            self.command,
            OrderSubcommand::List { .. } | OrderSubcommand::Show { .. }
        )
    }

    pub async fn run(&self, workshop: &Workshop) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            OrderSubcommand::Add {
                customer,
                style,
                description,
                amount,
                paid,
                due,
                notes,
            } => {
                if style.trim().is_empty() {
                    return Err("Order style cannot be empty".into());
                }
                check_amount("Amount", *amount)?;
                check_amount("Paid", *paid)?;

                let customer = find_customer(workshop, customer).await?;
                let mut order = Order::new(workshop.owner_id(), customer.meta.id, style.trim());
                if let Some(description) = description {
                    order = order.with_description(description);
                }
                if let Some(amount) = amount {
                    order = order.with_amount(*amount);
                }
                if let Some(paid) = paid {
                    order = order.with_amount_paid(*paid);
                }
                if let Some(due) = due {
                    order = order.with_due_date(parse_date(due)?);
                }
                if let Some(notes) = notes {
                    order = order.with_notes(notes);
                }

                let created = workshop.add_order(order).await?;
                println!("Created order for {}:", customer.full_name);
                println!("{}", created);
                Ok(())
            }

            OrderSubcommand::List {
                customer,
                status,
                format,
            } => {
                let mut orders: Vec<Order> = match customer {
                    Some(customer) => {
                        let customer = find_customer(workshop, customer).await?;
                        workshop.customer_orders(customer.meta.id).await?
                    }
                    None => workshop.list().await?,
                };
                if let Some(status) = status {
                    orders.retain(|o| o.status == *status);
                }

                if orders.is_empty() {
                    println!("No orders found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&orders)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<36}  {:<20}  {:<12}  {:>10}",
                            "ID", "STYLE", "STATUS", "BALANCE"
                        );
                        println!("{}", "-".repeat(84));
                        for order in &orders {
                            println!(
                                "{:<36}  {:<20}  {:<12}  {:>10.2}",
                                order.meta.id,
                                truncate(&order.style, 20),
                                order.status.to_string(),
                                order.balance()
                            );
                        }
                        println!("\nTotal: {} order(s)", orders.len());
                    }
                }
                Ok(())
            }

            OrderSubcommand::Show { id, format } => {
                let id = parse_id("order", id)?;
                let order = workshop
                    .get::<Order>(id)
                    .await?
                    .ok_or_else(|| format!("Order not found: {}", id))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&order)?);
                    }
                    OutputFormat::Text => {
                        print!("{}", order);
                        let invoices = workshop.order_invoices(order.meta.id).await?;
                        if !invoices.is_empty() {
                            println!("\nInvoices:");
                            for invoice in &invoices {
                                println!(
                                    "  - {} {:.2} [{}]",
                                    invoice.invoice_number, invoice.amount, invoice.status
                                );
                            }
                        }
                    }
                }
                Ok(())
            }

            OrderSubcommand::Update {
                id,
                style,
                description,
                amount,
                paid,
                status,
                due,
                notes,
            } => {
                let has_updates = style.is_some()
                    || description.is_some()
                    || amount.is_some()
                    || paid.is_some()
                    || status.is_some()
                    || due.is_some()
                    || notes.is_some();
                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }
                check_amount("Amount", *amount)?;
                check_amount("Paid", *paid)?;

                let id = parse_id("order", id)?;
                let due_date = due.as_deref().map(parse_date).transpose()?;

                let updated = workshop
                    .update::<Order, _>(id, |o| {
                        if let Some(style) = style {
                            o.style = style.clone();
                        }
                        if let Some(description) = description {
                            o.description = Some(description.clone());
                        }
                        if let Some(amount) = amount {
                            o.amount = *amount;
                        }
                        if let Some(paid) = paid {
                            o.amount_paid = *paid;
                        }
                        if let Some(status) = status {
                            o.status = *status;
                        }
                        if due_date.is_some() {
                            o.due_date = due_date;
                        }
                        if let Some(notes) = notes {
                            o.notes = Some(notes.clone());
                        }
                    })
                    .await?;

                println!("Updated order:");
                println!("{}", updated);
                Ok(())
            }

            OrderSubcommand::Delete { id, force } => {
                let id = parse_id("order", id)?;
                let order = workshop
                    .get::<Order>(id)
                    .await?
                    .ok_or_else(|| format!("Order not found: {}", id))?;

                if !force && !confirm(&format!("Delete order '{}' and its invoices?", order.style))?
                {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                workshop.delete::<Order>(id).await?;
                println!("Deleted order: {}", order.style);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_amount() {
        assert!(check_amount("Amount", None).is_ok());
        assert!(check_amount("Amount", Some(0.0)).is_ok());
        assert!(check_amount("Amount", Some(-1.0)).is_err());
        assert!(check_amount("Amount", Some(f64::NAN)).is_err());
    }
}
