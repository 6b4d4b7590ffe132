use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::order_status::OrderStatus;
use super::sync_meta::SyncMeta;
use crate::clock::{format_millis, Millis};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub customer_id: Uuid,
    pub style: String,
    pub description: Option<String>,
    pub amount: f64,
    pub amount_paid: f64,
    pub status: OrderStatus,
    pub due_date: Option<Millis>,
    pub notes: Option<String>,
}

impl Order {
    pub fn new(owner_id: impl Into<String>, customer_id: Uuid, style: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(owner_id),
            customer_id,
            style: style.into(),
            description: None,
            amount: 0.0,
            amount_paid: 0.0,
            status: OrderStatus::Pending,
            due_date: None,
            notes: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_amount_paid(mut self, amount_paid: f64) -> Self {
        self.amount_paid = amount_paid;
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_due_date(mut self, due_date: Millis) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn balance(&self) -> f64 {
        self.amount - self.amount_paid
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}]", self.style, self.status)?;
        writeln!(f, "ID: {}", self.meta.id)?;
        writeln!(f, "Customer: {}", self.customer_id)?;
        writeln!(
            f,
            "Amount: {:.2} (paid {:.2}, balance {:.2})",
            self.amount,
            self.amount_paid,
            self.balance()
        )?;
        if let Some(due) = self.due_date {
            writeln!(f, "Due: {}", format_millis(due))?;
        }
        if let Some(description) = &self.description {
            writeln!(f, "\n{}", description)?;
        }
        Ok(())
    }
}
