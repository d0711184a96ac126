// Delegate services the core calls out to: notification delivery,
// invoicing, and quote conversion.

pub mod email;
pub mod invoicing;
pub mod jobs;
pub mod sms;

pub use email::EmailService;
pub use invoicing::InvoiceService;
pub use jobs::JobService;
pub use sms::SmsService;
