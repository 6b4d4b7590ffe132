use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::sync_meta::SyncMeta;

pub const DEFAULT_UNIT: &str = "in";

/// A set of body measurements taken for a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub customer_id: Uuid,
    pub name: String,
    pub values: BTreeMap<String, f64>,
    pub unit: String,
    pub notes: Option<String>,
}

impl Measurement {
    pub fn new(owner_id: impl Into<String>, customer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(owner_id),
            customer_id,
            name: name.into(),
            values: BTreeMap::new(),
            unit: DEFAULT_UNIT.to_string(),
            notes: None,
        }
    }

    pub fn with_value(mut self, label: impl Into<String>, value: f64) -> Self {
        self.values.insert(label.into(), value);
        self
    }

    pub fn with_values(mut self, values: BTreeMap<String, f64>) -> Self {
        self.values = values;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.name, self.unit)?;
        for (label, value) in &self.values {
            writeln!(f, "  {}: {}", label, value)?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "Notes: {}", notes)?;
        }
        Ok(())
    }
}
