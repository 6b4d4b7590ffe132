use serde::{Deserialize, Serialize};
use std::fmt;

use super::sync_meta::SyncMeta;

/// A reusable list of measurement labels (e.g. "Men's trouser").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTemplate {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub fields: Vec<String>,
    pub gender: Option<String>,
}

impl MeasurementTemplate {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(owner_id),
            name: name.into(),
            fields: Vec::new(),
            gender: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }
}

impl fmt::Display for MeasurementTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.fields.join(", "))
    }
}
