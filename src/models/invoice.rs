use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::order_status::InvoiceStatus;
use super::sync_meta::SyncMeta;
use crate::clock::Millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub customer_id: Uuid,
    pub order_id: Uuid,
    pub invoice_number: String,
    pub amount: f64,
    pub status: InvoiceStatus,
    pub due_date: Option<Millis>,
    pub notes: Option<String>,
}

impl Invoice {
    pub fn new(
        owner_id: impl Into<String>,
        customer_id: Uuid,
        order_id: Uuid,
        invoice_number: impl Into<String>,
    ) -> Self {
        Self {
            meta: SyncMeta::new(owner_id),
            customer_id,
            order_id,
            invoice_number: invoice_number.into(),
            amount: 0.0,
            status: InvoiceStatus::Unpaid,
            due_date: None,
            notes: None,
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_status(mut self, status: InvoiceStatus) -> Self {
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
}

impl fmt::Display for Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:.2} [{}] order {}",
            self.invoice_number, self.amount, self.status, self.order_id
        )
    }
}
