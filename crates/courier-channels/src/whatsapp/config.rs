use crate::error::{Error, Result};
use crate::meta::DEFAULT_GRAPH_API;
use crate::transport::DeliverySettings;
use std::time::Duration;

/// WhatsApp Cloud API configuration
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Access token (from Meta Business Suite)
    pub access_token: String,
    /// Phone Number ID (the business phone number ID)
    pub phone_number_id: String,
    /// Business Account ID (owns the message templates)
    pub business_account_id: String,
    /// Webhook verify token (for webhook verification)
    pub webhook_verify_token: String,
    /// App secret for `X-Hub-Signature-256` verification
    pub app_secret: Option<String>,
    /// Graph API base URL including the version
    pub api_base: String,
    /// How long template approval statuses are cached
    pub template_cache_ttl: Duration,
    /// Maximum cached template statuses
    pub template_cache_capacity: usize,
    /// Timeout, retry and idempotency settings
    pub delivery: DeliverySettings,
}

impl WhatsAppConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        phone_number_id: impl Into<String>,
        business_account_id: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            phone_number_id: phone_number_id.into(),
            business_account_id: business_account_id.into(),
            webhook_verify_token: String::new(),
            app_secret: None,
            api_base: DEFAULT_GRAPH_API.to_string(),
            template_cache_ttl: Duration::from_secs(300),
            template_cache_capacity: 1_000,
            delivery: DeliverySettings::default(),
        }
    }

    /// Create from environment variables
    ///
    /// # Errors
    /// [`Error::Config`] when a required variable is missing.
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| Error::Config(format!("{name} not set")))
        };

        let mut config = Self::new(
            require("WHATSAPP_ACCESS_TOKEN")?,
            require("WHATSAPP_PHONE_NUMBER_ID")?,
            require("WHATSAPP_BUSINESS_ACCOUNT_ID")?,
        );
        if let Ok(token) = std::env::var("WHATSAPP_WEBHOOK_VERIFY_TOKEN") {
            config.webhook_verify_token = token;
        }
        config.app_secret = std::env::var("WHATSAPP_APP_SECRET").ok();
        if let Ok(base) = std::env::var("WHATSAPP_API_BASE") {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set webhook verify token
    #[must_use]
    pub fn with_webhook_verify_token(mut self, token: impl Into<String>) -> Self {
        self.webhook_verify_token = token.into();
        self
    }

    /// Set the app secret
    #[must_use]
    pub fn with_app_secret(mut self, secret: impl Into<String>) -> Self {
        self.app_secret = Some(secret.into());
        self
    }

    /// Point at a different Graph API host
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the template cache TTL
    #[must_use]
    pub fn with_template_cache_ttl(mut self, ttl: Duration) -> Self {
        self.template_cache_ttl = ttl;
        self
    }

    /// Set delivery settings
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliverySettings) -> Self {
        self.delivery = delivery;
        self
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base, self.phone_number_id)
    }

    pub(crate) fn media_url(&self) -> String {
        format!("{}/{}/media", self.api_base, self.phone_number_id)
    }

    pub(crate) fn templates_url(&self) -> String {
        format!("{}/{}/message_templates", self.api_base, self.business_account_id)
    }
}
