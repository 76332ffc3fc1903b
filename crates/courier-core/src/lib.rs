//! Courier Core - Conversation ingestion and delivery
//!
//! This crate provides the channel-independent half of Courier:
//! - Message: the internal message model shared by every channel
//! - Adapter: the contract each channel adapter implements
//! - Registry/Router: channel to adapter lookup and outbound dispatch
//! - Session: per-conversation inbound/outbound bookkeeping
//! - Orchestrator: validation, resolution, dedup, normalization,
//!   threading, ticket linking, persistence and event publication
//! - Store: the data-access capability and an in-memory implementation
//! - Utils: retry with backoff, rate limiting, metrics, bounded caches

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod capabilities;
pub mod error;
pub mod event_bus;
pub mod message;
pub mod normalize;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod utils;

pub use adapter::{ChannelAdapter, MediaFile};
pub use capabilities::{
    has_errors, ChannelCapabilities, ChannelFeatures, RateLimits, Severity, ValidationResult,
};
pub use error::{ApiError, ApiResponse, Error, ErrorCode, Result};
pub use event_bus::{DomainEvent, EventBus, EventPublisher};
pub use message::{
    Attachment, AttachmentType, ChannelDetails, ChannelMessage, ChannelSpecificData, ChannelType,
    ContactCard, CsatResponse, DeliveryStatus, EmailEnvelope, LocationPayload,
    MessageDeliveryResult, MessageType, Metadata, OutgoingMessage, OutgoingOptions, PricingInfo,
    ProcessedMessage, ProcessingMetadata, SenderType, TemplateRef, ThreadContext,
};
pub use normalize::{normalize_content, NormalizationStep, Normalized};
pub use orchestrator::{
    ConversationOrchestrator, ConversationUpdate, IngestOutcome, NewConversation,
    OrchestratorConfig, SendRequest, WebhookOutcome,
};
pub use registry::AdapterRegistry;
pub use router::MessageRouter;
pub use session::{SessionContextTracker, SessionSnapshot};
pub use store::{ConversationStore, InMemoryStore};
