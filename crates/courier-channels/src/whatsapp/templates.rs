//! Message template approval cache

use courier_core::utils::TtlCache;
use courier_core::TemplateRef;
use serde::Deserialize;
use std::time::Duration;

/// Status string the provider uses for usable templates
pub const APPROVED: &str = "APPROVED";

/// Template list page
#[derive(Debug, Deserialize)]
pub(crate) struct TemplatePage {
    #[serde(default)]
    pub data: Vec<TemplateInfo>,
    pub paging: Option<Paging>,
}

/// One template/language pair
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TemplateInfo {
    pub name: String,
    pub language: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Paging {
    pub next: Option<String>,
}

/// Template status by `name:language`
pub(crate) struct TemplateCache {
    statuses: TtlCache<String, String>,
}

fn cache_key(name: &str, language: &str) -> String {
    format!("{name}:{language}")
}

impl TemplateCache {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            statuses: TtlCache::new(capacity, ttl),
        }
    }

    /// Cached status, `None` on a miss
    pub(crate) fn status(&self, template: &TemplateRef) -> Option<String> {
        self.statuses
            .get(&cache_key(&template.name, &template.language))
    }

    pub(crate) fn store(&self, templates: &[TemplateInfo]) {
        for t in templates {
            self.statuses
                .insert(cache_key(&t.name, &t.language), t.status.to_ascii_uppercase());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.statuses.len()
    }
}
