//! Title/company/location normalization used for matching

use std::collections::HashSet;

/// Seniority and work-mode qualifiers that do not distinguish roles.
///
/// Discipline words (`backend`, `frontend`, `data`, ...) must never be added
/// here: two roles differing only by such a word would collapse into one key.
pub const DEFAULT_NOISE_TOKENS: &[&str] = &[
    "senior", "sr", "junior", "jr", "remote", "hybrid", "onsite", "fulltime", "parttime",
];

/// Identity used to match a summary against known detail records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedKey {
    pub title: String,
    pub company: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    noise: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_TOKENS.iter().copied())
    }
}

impl Normalizer {
    pub fn new<I, S>(noise_tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            noise: noise_tokens
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Lowercase, split on anything that is not alphanumeric, drop noise tokens.
    ///
    /// A noise token written as two words ("full time", "part-time") is
    /// dropped as well.
    pub fn normalize(&self, value: &str) -> String {
        let lowered = value.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut kept = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if let Some(next) = tokens.get(i + 1) {
                if self.noise.contains(&format!("{}{}", tokens[i], next)) {
                    i += 2;
                    continue;
                }
            }
            if !self.noise.contains(tokens[i]) {
                kept.push(tokens[i]);
            }
            i += 1;
        }

        kept.join(" ")
    }

    pub fn key(&self, title: &str, company: &str, location: &str) -> NormalizedKey {
        NormalizedKey {
            title: self.normalize(title),
            company: self.normalize(company),
            location: self.normalize(location),
        }
    }
}
