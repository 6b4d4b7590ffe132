use serde::{Deserialize, Serialize};
use std::fmt;

use super::sync_meta::SyncMeta;
use crate::clock::format_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl Customer {
    pub fn new(owner_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(owner_id),
            full_name: full_name.into(),
            phone_number: None,
            gender: None,
            email: None,
            notes: None,
        }
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.phone_number = Some(phone_number.into());
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl fmt::Display for Customer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.full_name)?;
        writeln!(f, "{}", "=".repeat(self.full_name.len()))?;
        writeln!(f, "ID: {}", self.meta.id)?;

        if let Some(phone) = &self.phone_number {
            writeln!(f, "Phone: {}", phone)?;
        }
        if let Some(email) = &self.email {
            writeln!(f, "Email: {}", email)?;
        }
        if let Some(gender) = &self.gender {
            writeln!(f, "Gender: {}", gender)?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "\nNotes:\n{}", notes)?;
        }

        writeln!(f, "\nUpdated: {}", format_millis(self.meta.updated_at))?;
        writeln!(f, "Sync: {}", self.meta.sync_status)?;

        Ok(())
    }
}
