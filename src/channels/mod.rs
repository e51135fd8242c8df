//! Channel abstraction for inbound attachments and outbound exports.

pub mod delivery;
pub mod email;
pub mod email_types;
pub mod source;

pub use delivery::{Delivery, OutboundAttachment, OutboundMessage};
pub use email::{EmailConfig, ImapSource, SmtpDelivery};
pub use source::{Attachment, FetchQuery, MessageSource, SourceMessage};
