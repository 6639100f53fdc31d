//! Job profile derived from a title and its description
//!
//! All matching is case-insensitive substring matching over the lowercased
//! title and description text.

use regex::Regex;
use std::sync::OnceLock;

use jobstream_common::types::{JobCategory, SeniorityLevel};

const SENIORITY_KEYWORDS: &[&str] = &[
    "lead", "senior", "principal", "staff", "architect", "director", "head", "chief",
];

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "state-of-the-art",
    "cutting-edge",
    "research",
    "phd",
    "deep learning",
    "machine learning",
    "ai",
    "algorithm",
    "architecture",
    "distributed",
    "scalability",
    "real-time",
    "end-to-end",
    "full cycle",
    "generative",
];

const ENGINEERING_KEYWORDS: &[&str] = &[
    "engineer",
    "developer",
    "software",
    "algorithm",
    "backend",
    "frontend",
    "full stack",
    "devops",
    "sre",
    "data engineer",
    "ml",
    "ai",
    "nlp",
    "computer vision",
    "infrastructure",
    "architect",
    "technical",
];

const PRODUCT_KEYWORDS: &[&str] = &[
    "product manager",
    "product owner",
    "pm",
    "product lead",
    "product strategy",
    "roadmap",
    "stakeholder",
];

const DESIGN_KEYWORDS: &[&str] = &[
    "designer",
    "ux",
    "ui",
    "user experience",
    "user interface",
    "graphic design",
    "visual design",
    "design system",
];

const OPERATIONS_KEYWORDS: &[&str] = &[
    "operations",
    "ops manager",
    "program manager",
    "project manager",
    "scrum master",
    "agile coach",
    "business operations",
    "customer success",
];

const LEAD_TITLE_KEYWORDS: &[&str] = &["lead", "principal", "staff", "director", "head", "chief"];
const SENIOR_TITLE_KEYWORDS: &[&str] = &["senior", "sr."];
const JUNIOR_TITLE_KEYWORDS: &[&str] = &["junior", "jr.", "entry", "associate"];
const ADVANCED_DEGREE_KEYWORDS: &[&str] = &["phd", "ph.d", "m.sc", "master"];
const LEADERSHIP_KEYWORDS: &[&str] = &[
    "lead team",
    "mentor",
    "autonomy",
    "independently",
    "ownership",
    "drive",
    "strategy",
    "architecture decision",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProfile {
    pub category: JobCategory,
    pub seniority_level: SeniorityLevel,
    pub complexity_score: u8,
}

impl JobProfile {
    pub fn derive(title: &str, description: &str, requirements: &[String]) -> Self {
        let title = title.to_lowercase();
        let text = description.to_lowercase();
        let years = years_of_experience(&text);

        Self {
            category: categorize(&title, &text),
            seniority_level: seniority(&title, &text, years, requirements.len()),
            complexity_score: complexity_score(&title, &text, years, requirements.len()),
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn year_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"(\d+)\+?\s*years", r"(\d+)\s*-\s*(\d+)\s*years"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Largest year count mentioned as "N years", "N+ years" or "N-M years"
pub fn years_of_experience(text: &str) -> u32 {
    year_patterns()
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .flat_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .filter_map(|m| m.as_str().parse::<u32>().ok())
                .collect::<Vec<_>>()
        })
        .max()
        .unwrap_or(0)
}

/// Score in 0..=100
pub fn complexity_score(title: &str, text: &str, years: u32, requirement_count: usize) -> u8 {
    let mut score = (requirement_count.saturating_mul(5)).min(35) as u32;

    score += match years {
        y if y >= 7 => 30,
        y if y >= 5 => 25,
        y if y >= 3 => 20,
        y if y >= 1 => 10,
        _ => 0,
    };

    if contains_any(title, SENIORITY_KEYWORDS) {
        score += 20;
    }

    let keyword_hits = COMPLEXITY_KEYWORDS.iter().filter(|k| text.contains(*k)).count() as u32;
    score += (keyword_hits * 2).min(15);

    score.min(100) as u8
}

pub fn categorize(title: &str, text: &str) -> JobCategory {
    let combined = format!("{title} {text}");

    if contains_any(&combined, ENGINEERING_KEYWORDS) {
        JobCategory::Engineering
    } else if contains_any(&combined, PRODUCT_KEYWORDS) {
        JobCategory::Product
    } else if contains_any(&combined, DESIGN_KEYWORDS) {
        JobCategory::Design
    } else if contains_any(&combined, OPERATIONS_KEYWORDS) {
        JobCategory::Operations
    } else {
        JobCategory::Other
    }
}

pub fn seniority(title: &str, text: &str, years: u32, requirement_count: usize) -> SeniorityLevel {
    if contains_any(title, LEAD_TITLE_KEYWORDS) {
        return SeniorityLevel::Lead;
    }
    if contains_any(title, SENIOR_TITLE_KEYWORDS) {
        return SeniorityLevel::Senior;
    }
    if contains_any(title, JUNIOR_TITLE_KEYWORDS) {
        return SeniorityLevel::Junior;
    }

    let combined = format!("{title} {text}");
    let advanced_degree = contains_any(&combined, ADVANCED_DEGREE_KEYWORDS);
    let leadership = contains_any(&combined, LEADERSHIP_KEYWORDS);

    if years >= 7 || (advanced_degree && years >= 5) {
        SeniorityLevel::Lead
    } else if years >= 5 || (years >= 3 && leadership) {
        SeniorityLevel::Senior
    } else if years >= 2 || (years >= 1 && requirement_count <= 5) {
        SeniorityLevel::Mid
    } else {
        SeniorityLevel::Junior
    }
}
