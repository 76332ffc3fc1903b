//! WhatsApp Cloud API adapter

/// WhatsApp Cloud API adapter.
pub mod adapter;
/// WhatsApp configuration and credentials.
pub mod config;
mod templates;
/// Incoming webhook payload types.
pub mod webhook;

pub use adapter::WhatsAppAdapter;
pub use config::WhatsAppConfig;
pub use templates::APPROVED as TEMPLATE_APPROVED;
