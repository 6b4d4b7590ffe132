//! Wire representation of synchronizable records.
//!
//! Every entity has its own camelCase DTO. Local-only metadata (`owner_id`,
//! `sync_status`) never goes on the wire; inbound rows are stamped with the
//! local owner and marked synced.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::changeset::{ChangeSet, EntityChanges};
use crate::clock::Millis;
use crate::db::{Record, Table};
use crate::models::{
    Customer, Invoice, InvoiceStatus, Measurement, MeasurementTemplate, Order, OrderStatus,
    SyncMeta, SyncStatus, DEFAULT_UNIT,
};

/// A wire row could not be turned into a local record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("{table}: invalid {field} '{value}'")]
    InvalidId {
        table: Table,
        field: &'static str,
        value: String,
    },

    #[error("{table} {id}: missing required field '{field}'")]
    MissingField {
        table: Table,
        id: Uuid,
        field: &'static str,
    },

    #[error("{table} {id}: required field '{field}' is empty")]
    EmptyField {
        table: Table,
        id: Uuid,
        field: &'static str,
    },

    #[error("{table} {id}: {message}")]
    InvalidValue {
        table: Table,
        id: Uuid,
        message: String,
    },
}

/// Accessors the change-set code needs on every DTO.
pub trait WireRow {
    fn id(&self) -> &str;
    fn updated_at(&self) -> Millis;
    fn deleted_at(&self) -> Option<Millis>;
}

/// A record type that can travel in a [`ChangeSet`].
pub trait Syncable: Record {
    type Dto: WireRow + Serialize + DeserializeOwned + Debug + Clone + PartialEq + Send + Sync;

    fn to_dto(&self) -> Self::Dto;

    /// Maps an inbound row, owned by `owner_id` and marked synced.
    fn from_dto(dto: Self::Dto, owner_id: &str) -> Result<Self, MappingError>;

    /// This entity's slot in a change set.
    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<Self::Dto>;
}

pub(crate) fn parse_id(table: Table, field: &'static str, value: &str) -> Result<Uuid, MappingError> {
    Uuid::parse_str(value).map_err(|_| MappingError::InvalidId {
        table,
        field,
        value: value.to_string(),
    })
}

fn required<T>(table: Table, id: Uuid, field: &'static str, value: Option<T>) -> Result<T, MappingError> {
    value.ok_or(MappingError::MissingField { table, id, field })
}

/// Like [`required`], but blank text counts as empty.
fn required_text(
    table: Table,
    id: Uuid,
    field: &'static str,
    value: Option<String>,
) -> Result<String, MappingError> {
    let value = required(table, id, field, value)?;
    if value.trim().is_empty() {
        return Err(MappingError::EmptyField { table, id, field });
    }
    Ok(value)
}

fn inbound_meta(
    table: Table,
    id: Uuid,
    owner_id: &str,
    created_at: Millis,
    updated_at: Millis,
    deleted_at: Option<Millis>,
) -> Result<SyncMeta, MappingError> {
    if created_at < 0 || updated_at < 0 {
        return Err(MappingError::InvalidValue {
            table,
            id,
            message: "negative timestamp".to_string(),
        });
    }
    Ok(SyncMeta {
        id,
        owner_id: owner_id.to_string(),
        created_at,
        updated_at,
        deleted_at,
        sync_status: SyncStatus::Synced,
    })
}

macro_rules! wire_row {
    ($dto:ty) => {
        impl WireRow for $dto {
            fn id(&self) -> &str {
                &self.id
            }

            fn updated_at(&self) -> Millis {
                self.updated_at
            }

            fn deleted_at(&self) -> Option<Millis> {
                self.deleted_at
            }
        }
    };
}

// ========== Customers ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDto {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub deleted_at: Option<Millis>,
}

wire_row!(CustomerDto);

impl Syncable for Customer {
    type Dto = CustomerDto;

    fn to_dto(&self) -> CustomerDto {
        CustomerDto {
            id: self.meta.id.to_string(),
            full_name: Some(self.full_name.clone()),
            phone_number: self.phone_number.clone(),
            gender: self.gender.clone(),
            email: self.email.clone(),
            notes: self.notes.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
        }
    }

    fn from_dto(dto: CustomerDto, owner_id: &str) -> Result<Self, MappingError> {
        let id = parse_id(Self::TABLE, "id", &dto.id)?;
        Ok(Customer {
            meta: inbound_meta(
                Self::TABLE,
                id,
                owner_id,
                dto.created_at,
                dto.updated_at,
                dto.deleted_at,
            )?,
            full_name: required_text(Self::TABLE, id, "fullName", dto.full_name)?,
            phone_number: dto.phone_number,
            gender: dto.gender,
            email: dto.email,
            notes: dto.notes,
        })
    }

    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<CustomerDto> {
        &mut set.customers
    }
}

// ========== Measurement templates ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementTemplateDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub gender: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub deleted_at: Option<Millis>,
}

wire_row!(MeasurementTemplateDto);

impl Syncable for MeasurementTemplate {
    type Dto = MeasurementTemplateDto;

    fn to_dto(&self) -> MeasurementTemplateDto {
        MeasurementTemplateDto {
            id: self.meta.id.to_string(),
            name: Some(self.name.clone()),
            fields: self.fields.clone(),
            gender: self.gender.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
        }
    }

    fn from_dto(dto: MeasurementTemplateDto, owner_id: &str) -> Result<Self, MappingError> {
        let id = parse_id(Self::TABLE, "id", &dto.id)?;
        Ok(MeasurementTemplate {
            meta: inbound_meta(
                Self::TABLE,
                id,
                owner_id,
                dto.created_at,
                dto.updated_at,
                dto.deleted_at,
            )?,
            name: required_text(Self::TABLE, id, "name", dto.name)?,
            fields: dto.fields,
            gender: dto.gender,
        })
    }

    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<MeasurementTemplateDto> {
        &mut set.measurement_templates
    }
}

// ========== Measurements ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementDto {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub deleted_at: Option<Millis>,
}

wire_row!(MeasurementDto);

impl Syncable for Measurement {
    type Dto = MeasurementDto;

    fn to_dto(&self) -> MeasurementDto {
        MeasurementDto {
            id: self.meta.id.to_string(),
            customer_id: Some(self.customer_id.to_string()),
            name: Some(self.name.clone()),
            values: self.values.clone(),
            unit: Some(self.unit.clone()),
            notes: self.notes.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
        }
    }

    fn from_dto(dto: MeasurementDto, owner_id: &str) -> Result<Self, MappingError> {
        let id = parse_id(Self::TABLE, "id", &dto.id)?;
        let customer_id = required(Self::TABLE, id, "customerId", dto.customer_id)?;
        Ok(Measurement {
            meta: inbound_meta(
                Self::TABLE,
                id,
                owner_id,
                dto.created_at,
                dto.updated_at,
                dto.deleted_at,
            )?,
            customer_id: parse_id(Self::TABLE, "customerId", &customer_id)?,
            name: required_text(Self::TABLE, id, "name", dto.name)?,
            values: dto.values,
            unit: dto.unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            notes: dto.notes,
        })
    }

    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<MeasurementDto> {
        &mut set.measurements
    }
}

// ========== Orders ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub amount_paid: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<Millis>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub deleted_at: Option<Millis>,
}

wire_row!(OrderDto);

impl Syncable for Order {
    type Dto = OrderDto;

    fn to_dto(&self) -> OrderDto {
        OrderDto {
            id: self.meta.id.to_string(),
            customer_id: Some(self.customer_id.to_string()),
            style: Some(self.style.clone()),
            description: self.description.clone(),
            amount: self.amount,
            amount_paid: self.amount_paid,
            status: Some(self.status.to_string()),
            due_date: self.due_date,
            notes: self.notes.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
        }
    }

    fn from_dto(dto: OrderDto, owner_id: &str) -> Result<Self, MappingError> {
        let id = parse_id(Self::TABLE, "id", &dto.id)?;
        let customer_id = required(Self::TABLE, id, "customerId", dto.customer_id)?;
        let status = match dto.status {
            Some(raw) => raw
                .parse::<OrderStatus>()
                .map_err(|message| MappingError::InvalidValue {
                    table: Self::TABLE,
                    id,
                    message,
                })?,
            None => OrderStatus::default(),
        };
        Ok(Order {
            meta: inbound_meta(
                Self::TABLE,
                id,
                owner_id,
                dto.created_at,
                dto.updated_at,
                dto.deleted_at,
            )?,
            customer_id: parse_id(Self::TABLE, "customerId", &customer_id)?,
            style: required_text(Self::TABLE, id, "style", dto.style)?,
            description: dto.description,
            amount: dto.amount,
            amount_paid: dto.amount_paid,
            status,
            due_date: dto.due_date,
            notes: dto.notes,
        })
    }

    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<OrderDto> {
        &mut set.orders
    }
}

// ========== Invoices ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDto {
    pub id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<Millis>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub deleted_at: Option<Millis>,
}

wire_row!(InvoiceDto);

impl Syncable for Invoice {
    type Dto = InvoiceDto;

    fn to_dto(&self) -> InvoiceDto {
        InvoiceDto {
            id: self.meta.id.to_string(),
            customer_id: Some(self.customer_id.to_string()),
            order_id: Some(self.order_id.to_string()),
            invoice_number: Some(self.invoice_number.clone()),
            amount: self.amount,
            status: Some(self.status.to_string()),
            due_date: self.due_date,
            notes: self.notes.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            deleted_at: self.meta.deleted_at,
        }
    }

    fn from_dto(dto: InvoiceDto, owner_id: &str) -> Result<Self, MappingError> {
        let id = parse_id(Self::TABLE, "id", &dto.id)?;
        let customer_id = required(Self::TABLE, id, "customerId", dto.customer_id)?;
        let order_id = required(Self::TABLE, id, "orderId", dto.order_id)?;
        let status = match dto.status {
            Some(raw) => raw
                .parse::<InvoiceStatus>()
                .map_err(|message| MappingError::InvalidValue {
                    table: Self::TABLE,
                    id,
                    message,
                })?,
            None => InvoiceStatus::default(),
        };
        Ok(Invoice {
            meta: inbound_meta(
                Self::TABLE,
                id,
                owner_id,
                dto.created_at,
                dto.updated_at,
                dto.deleted_at,
            )?,
            customer_id: parse_id(Self::TABLE, "customerId", &customer_id)?,
            order_id: parse_id(Self::TABLE, "orderId", &order_id)?,
            invoice_number: required_text(Self::TABLE, id, "invoiceNumber", dto.invoice_number)?,
            amount: dto.amount,
            status,
            due_date: dto.due_date,
            notes: dto.notes,
        })
    }

    fn changes_mut(set: &mut ChangeSet) -> &mut EntityChanges<InvoiceDto> {
        &mut set.invoices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_customer_dto_is_camel_case_without_local_metadata() {
        let mut customer = Customer::new("owner-1", "Ada Obi").with_phone_number("0803");
        customer.meta.created_at = 10;
        customer.meta.updated_at = 20;

        let value = serde_json::to_value(customer.to_dto()).unwrap();
        assert_eq!(value["fullName"], "Ada Obi");
        assert_eq!(value["phoneNumber"], "0803");
        assert_eq!(value["createdAt"], 10);
        assert_eq!(value["updatedAt"], 20);
        assert!(value.get("ownerId").is_none());
        assert!(value.get("owner_id").is_none());
        assert!(value.get("syncStatus").is_none());
    }

    #[test]
    fn test_inbound_customer_is_owned_and_synced() {
        let id = Uuid::new_v4();
        let dto: CustomerDto = serde_json::from_value(json!({
            "id": id.to_string(),
            "fullName": "Bola",
            "createdAt": 5,
            "updatedAt": 7
        }))
        .unwrap();

        let customer = Customer::from_dto(dto, "owner-2").unwrap();
        assert_eq!(customer.meta.id, id);
        assert_eq!(customer.meta.owner_id, "owner-2");
        assert_eq!(customer.meta.sync_status, SyncStatus::Synced);
        assert_eq!(customer.meta.updated_at, 7);
        assert_eq!(customer.full_name, "Bola");
        assert!(customer.phone_number.is_none());
    }

    #[test]
    fn test_missing_required_field_is_typed_error() {
        let id = Uuid::new_v4();
        let dto: CustomerDto = serde_json::from_value(json!({
            "id": id.to_string(),
            "createdAt": 1,
            "updatedAt": 1
        }))
        .unwrap();

        let err = Customer::from_dto(dto, "o").unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingField {
                table: Table::Customers,
                id,
                field: "fullName"
            }
        );
    }

    #[test]
    fn test_blank_required_text_is_typed_error() {
        let id = Uuid::new_v4();
        let dto: CustomerDto = serde_json::from_value(json!({
            "id": id.to_string(),
            "fullName": "",
            "createdAt": 1,
            "updatedAt": 1
        }))
        .unwrap();
        assert_eq!(
            Customer::from_dto(dto, "o").unwrap_err(),
            MappingError::EmptyField {
                table: Table::Customers,
                id,
                field: "fullName"
            }
        );

        let dto: OrderDto = serde_json::from_value(json!({
            "id": id.to_string(),
            "customerId": Uuid::new_v4().to_string(),
            "style": "   ",
            "createdAt": 1,
            "updatedAt": 1
        }))
        .unwrap();
        assert!(matches!(
            Order::from_dto(dto, "o"),
            Err(MappingError::EmptyField { field: "style", .. })
        ));
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let dto: MeasurementDto = serde_json::from_value(json!({
            "id": "not-a-uuid",
            "customerId": Uuid::new_v4().to_string(),
            "name": "Agbada",
            "createdAt": 1,
            "updatedAt": 1
        }))
        .unwrap();

        assert!(matches!(
            Measurement::from_dto(dto, "o"),
            Err(MappingError::InvalidId { field: "id", .. })
        ));
    }

    #[test]
    fn test_measurement_unit_defaults() {
        let dto: MeasurementDto = serde_json::from_value(json!({
            "id": Uuid::new_v4().to_string(),
            "customerId": Uuid::new_v4().to_string(),
            "name": "Shirt",
            "values": {"chest": 40.5},
            "createdAt": 1,
            "updatedAt": 1
        }))
        .unwrap();

        let measurement = Measurement::from_dto(dto, "o").unwrap();
        assert_eq!(measurement.unit, DEFAULT_UNIT);
        assert_eq!(measurement.values.get("chest"), Some(&40.5));
    }

    #[test]
    fn test_order_status_parsed_and_defaulted() {
        let customer_id = Uuid::new_v4();
        let mut order = Order::new("o", customer_id, "Kaftan").with_status(OrderStatus::Ready);
        order.meta.created_at = 1;
        order.meta.updated_at = 2;

        let dto = order.to_dto();
        assert_eq!(dto.status.as_deref(), Some("ready"));

        let back = Order::from_dto(dto.clone(), "o").unwrap();
        assert_eq!(back.status, OrderStatus::Ready);

        let defaulted = Order::from_dto(OrderDto { status: None, ..dto.clone() }, "o").unwrap();
        assert_eq!(defaulted.status, OrderStatus::Pending);

        let invalid = Order::from_dto(
            OrderDto {
                status: Some("lost".into()),
                ..dto
            },
            "o",
        );
        assert!(matches!(invalid, Err(MappingError::InvalidValue { .. })));
    }

    #[test]
    fn test_negative_timestamp_rejected() {
        let dto: MeasurementTemplateDto = serde_json::from_value(json!({
            "id": Uuid::new_v4().to_string(),
            "name": "Trouser",
            "createdAt": -1,
            "updatedAt": 1
        }))
        .unwrap();

        assert!(matches!(
            MeasurementTemplate::from_dto(dto, "o"),
            Err(MappingError::InvalidValue { .. })
        ));
    }
}
