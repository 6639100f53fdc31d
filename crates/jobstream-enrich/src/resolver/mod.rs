//! Detail resolvers: fetch the full description behind a summary

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ResolverError;

pub use http::HttpDetailResolver;

/// What the correlation engine asks a resolver for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRequest {
    /// Direct link; when absent the resolver derives one from the hints
    pub reference: Option<String>,
    pub title_hint: String,
    pub company_hint: String,
}

impl DetailRequest {
    pub fn by_reference(reference: impl Into<String>, title_hint: &str, company_hint: &str) -> Self {
        Self {
            reference: Some(reference.into()),
            title_hint: title_hint.to_string(),
            company_hint: company_hint.to_string(),
        }
    }

    pub fn by_hints(title_hint: &str, company_hint: &str) -> Self {
        Self {
            reference: None,
            title_hint: title_hint.to_string(),
            company_hint: company_hint.to_string(),
        }
    }
}

/// A successfully fetched detail page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDetail {
    /// Reference actually fetched
    pub reference: String,
    /// Page heading, empty if the page had none
    pub title: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub responsibilities: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Source of full job descriptions. Shared by every partition pipeline,
/// so implementations must tolerate concurrent calls.
#[async_trait]
pub trait DetailResolver: Send + Sync {
    async fn resolve(&self, request: &DetailRequest) -> Result<ResolvedDetail, ResolverError>;
}
