mod customer;
mod invoice;
mod measurement;
mod order;
mod order_status;
mod sync_meta;
mod template;

pub use customer::Customer;
pub use invoice::Invoice;
pub use measurement::{Measurement, DEFAULT_UNIT};
pub use order::Order;
pub use order_status::{InvoiceStatus, OrderStatus};
pub use sync_meta::{SyncMeta, SyncStatus};
pub use template::MeasurementTemplate;
