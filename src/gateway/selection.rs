//! Prompt-driven backend selection
//!
//! Produces an ordered candidate list per request: the caller's explicit
//! choice, or a classification of the prompt against a fixed category table,
//! or the configured static chains. The orchestrator consumes the list as a
//! fallback priority queue.

use parking_lot::RwLock;
use tracing::debug;

use crate::config::SelectionPolicy;
use crate::error::{BrokerError, Result};

/// One prompt category with its scoring table and backend preferences
pub struct Category {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub preferred: &'static [&'static str],
    pub fallback: &'static [&'static str],
    pub base_confidence: f32,
}

/// Fixed category table. Declaration order is the tie-break: when two
/// categories score equally, the earlier one wins.
pub const CATEGORIES: &[Category] = &[
    Category {
        name: "text-design",
        keywords: &["text", "logo", "typography", "lettering", "poster", "sign", "wordmark", "label"],
        preferred: &["ideogram", "recraft"],
        fallback: &["openai", "bfl"],
        base_confidence: 0.9,
    },
    Category {
        name: "photoreal",
        keywords: &["photo", "photorealistic", "realistic", "portrait", "photograph", "cinematic", "film"],
        preferred: &["bfl", "stability"],
        fallback: &["openai", "leonardo"],
        base_confidence: 0.85,
    },
    Category {
        name: "quick-draft",
        keywords: &["quick", "draft", "fast", "rough", "preview", "thumbnail"],
        preferred: &["together", "fal"],
        fallback: &["stability"],
        base_confidence: 0.75,
    },
    Category {
        name: "illustration",
        keywords: &["illustration", "watercolor", "cartoon", "anime", "drawing", "painting", "sketch"],
        preferred: &["leonardo", "recraft"],
        fallback: &["stability", "together"],
        base_confidence: 0.8,
    },
    Category {
        name: "detailed-art",
        keywords: &["intricate", "detailed", "masterpiece", "ornate", "8k", "highly detailed"],
        preferred: &["bfl", "openai"],
        fallback: &["stability", "leonardo"],
        base_confidence: 0.8,
    },
    Category {
        name: "product",
        keywords: &["product", "mockup", "packaging", "render", "studio"],
        preferred: &["openai", "recraft"],
        fallback: &["stability"],
        base_confidence: 0.7,
    },
];

const QUALITY_HINTS: &[&str] = &["best", "beautiful", "stunning", "professional", "award"];
const SPEED_HINTS: &[&str] = &["simple", "basic", "plain", "minimal"];

/// Score for the winning category, computed per request
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionScore {
    pub category: &'static str,
    pub score: u32,
    pub confidence: f32,
}

/// Classify a prompt against the category table.
///
/// Score is the sum of matched keyword lengths, so longer, more specific
/// keywords weigh more. Pure function of (prompt, table); no backend
/// knowledge involved.
pub fn classify(prompt: &str) -> Option<(&'static Category, SelectionScore)> {
    let haystack = prompt.to_lowercase();
    let mut best: Option<(&'static Category, SelectionScore)> = None;

    for category in CATEGORIES {
        let mut score = 0u32;
        let mut matched = 0usize;
        for keyword in category.keywords {
            if haystack.contains(keyword) {
                score += keyword.len() as u32;
                matched += 1;
            }
        }
        if matched == 0 {
            continue;
        }

        let confidence = category.base_confidence
            * (0.5 + 0.5 * matched as f32 / category.keywords.len() as f32);
        let candidate = SelectionScore {
            category: category.name,
            score,
            confidence,
        };

        // Strictly-greater keeps the declaration-order tie-break.
        match &best {
            Some((_, current)) if candidate.score <= current.score => {}
            _ => best = Some((category, candidate)),
        }
    }

    best
}

/// Chooses which backends to try, in what order
pub struct SelectionEngine {
    policy: RwLock<SelectionPolicy>,
}

impl SelectionEngine {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    /// Swap the chain orderings at runtime
    pub fn set_policy(&self, policy: SelectionPolicy) {
        *self.policy.write() = policy;
    }

    /// Resolve the ordered candidate list for one request.
    ///
    /// `configured` is the set of backends whose credentials are present.
    /// Explicit mode puts the named backend first and appends the automatic
    /// chain (minus the named backend) for fallback use; the orchestrator
    /// decides whether anything past the head is ever consulted.
    pub fn candidates(
        &self,
        prompt: &str,
        explicit: Option<&str>,
        configured: &[String],
    ) -> Result<Vec<String>> {
        if let Some(name) = explicit {
            if !configured.iter().any(|c| c == name) {
                return Err(BrokerError::Configuration(format!(
                    "backend '{}' is not configured",
                    name
                )));
            }
            let mut ordered = vec![name.to_string()];
            for candidate in self.auto_candidates(prompt, configured) {
                if candidate != name {
                    ordered.push(candidate);
                }
            }
            debug!(backend = %name, "Explicit backend selection");
            return Ok(ordered);
        }

        let ordered = self.auto_candidates(prompt, configured);
        if ordered.is_empty() {
            return Err(BrokerError::Configuration(
                "no configured backend available".to_string(),
            ));
        }
        Ok(ordered)
    }

    fn auto_candidates(&self, prompt: &str, configured: &[String]) -> Vec<String> {
        if let Some((category, score)) = classify(prompt) {
            debug!(
                category = %score.category,
                score = score.score,
                confidence = score.confidence,
                "Prompt classified"
            );
            let chain = category
                .preferred
                .iter()
                .chain(category.fallback.iter())
                .map(|s| s.to_string())
                .collect::<Vec<_>>();
            let filtered = filter_configured(&chain, configured);
            if !filtered.is_empty() {
                return filtered;
            }
        }

        let policy = self.policy.read();
        let haystack = prompt.to_lowercase();
        if QUALITY_HINTS.iter().any(|hint| haystack.contains(hint)) {
            let filtered = filter_configured(&policy.quality_chain, configured);
            if !filtered.is_empty() {
                debug!("Prompt matched quality heuristics");
                return filtered;
            }
        }
        if SPEED_HINTS.iter().any(|hint| haystack.contains(hint)) {
            let filtered = filter_configured(&policy.speed_chain, configured);
            if !filtered.is_empty() {
                debug!("Prompt matched speed heuristics");
                return filtered;
            }
        }

        filter_configured(&policy.priority_chain, configured)
    }
}

fn filter_configured(chain: &[String], configured: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for name in chain {
        if configured.iter().any(|c| c == name) && !seen.contains(name) {
            seen.push(name.clone());
        }
    }
    seen
}
