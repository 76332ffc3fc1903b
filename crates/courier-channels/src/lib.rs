//! Courier Channels - Channel Adapters
//!
//! This crate provides channel adapters for the supported messaging channels:
//! - WhatsApp (Cloud API, with template approval checks)
//! - Instagram (direct messages, comments and mentions)
//! - Messenger (Messenger Platform Send API)
//! - SMS/MMS (Twilio-style form API)
//! - E-mail (SendGrid-style API, inbound parse)
//! - Web chat (local broadcast outbox)
//!
//! Provider calls share one HTTP transport (timeout, retry with backoff,
//! `Retry-After`) and one delivery pipeline (idempotency, metrics).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod delivery;
pub mod email;
pub mod error;
pub mod instagram;
pub mod messenger;
pub mod meta;
pub mod sms;
pub mod transport;
pub mod util;
pub mod web;
pub mod whatsapp;

pub use error::{Error, Result};

pub use delivery::IdempotencyCache;
pub use transport::{DeliverySettings, HttpTransport};

// Re-export adapters
pub use email::{EmailAdapter, EmailConfig};
pub use instagram::{InstagramAdapter, InstagramConfig};
pub use messenger::{MessengerAdapter, MessengerConfig};
pub use sms::{SmsAdapter, SmsConfig};
pub use web::{WebAdapter, WebConfig, WebOutboxEvent};
pub use whatsapp::{WhatsAppAdapter, WhatsAppConfig};
