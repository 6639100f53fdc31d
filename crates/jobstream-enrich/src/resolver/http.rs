//! Detail pages fetched over HTTP and parsed with `scraper`

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{DetailRequest, DetailResolver, ResolvedDetail};
use crate::config::ResolverConfig;
use crate::error::ResolverError;

const TITLE_SELECTOR: &str = "h1";
const REQUIREMENTS_SELECTOR: &str = ".career-text-block__wrp--data--requirements li";
const RESPONSIBILITIES_SELECTOR: &str = ".careers-text-block__desc li";

pub struct HttpDetailResolver {
    client: Client,
    base_url: String,
    timeout: Duration,
    rate_limit: Duration,
}

impl HttpDetailResolver {
    pub fn new(config: &ResolverConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            rate_limit: config.rate_limit,
        })
    }

    /// URL for a request: the direct reference, or one derived from the title
    pub fn url_for(&self, request: &DetailRequest) -> String {
        match request.reference.as_deref() {
            Some(reference) => reference.to_string(),
            None => format!("{}{}/", self.base_url, slugify(&request.title_hint)),
        }
    }

    fn classify(&self, err: reqwest::Error) -> ResolverError {
        if err.is_timeout() {
            ResolverError::Timeout(self.timeout)
        } else {
            ResolverError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl DetailResolver for HttpDetailResolver {
    #[instrument(skip(self, request), fields(title = %request.title_hint))]
    async fn resolve(&self, request: &DetailRequest) -> Result<ResolvedDetail, ResolverError> {
        let url = self.url_for(request);

        if !self.rate_limit.is_zero() {
            tokio::time::sleep(self.rate_limit).await;
        }

        debug!(url = %url, "Fetching detail page");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ResolverError::NotFound(url));
        }
        if !status.is_success() {
            return Err(ResolverError::Unavailable(format!("{url} returned {status}")));
        }

        let html = response.text().await.map_err(|e| self.classify(e))?;
        let page = DetailPage::parse(&html);
        debug!(
            url = %url,
            bytes = html.len(),
            requirements = page.requirements.len(),
            "Parsed detail page"
        );

        Ok(ResolvedDetail {
            reference: url,
            title: page.title,
            description: page.text,
            requirements: page.requirements,
            responsibilities: page.responsibilities,
            fetched_at: Utc::now(),
        })
    }
}

/// Fields extracted from a careers detail page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailPage {
    pub title: String,
    pub text: String,
    pub requirements: Vec<String>,
    pub responsibilities: Vec<String>,
}

impl DetailPage {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);

        let title = select_texts(&document, TITLE_SELECTOR)
            .into_iter()
            .next()
            .unwrap_or_default();
        let text = collapse_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "));

        Self {
            title,
            text,
            requirements: select_texts(&document, REQUIREMENTS_SELECTOR),
            responsibilities: select_texts(&document, RESPONSIBILITIES_SELECTOR),
        }
    }
}

fn select_texts(document: &Html, css: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Path segment for a title: lowercased, spaces become dashes
pub fn slugify(title: &str) -> String {
    title.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}
