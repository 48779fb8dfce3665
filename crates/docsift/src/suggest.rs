//! Per-tenant prefix autocomplete over filenames, vendors, entities,
//! keywords, and sampled content terms. Ordered maps give the
//! lexicographic prefix scan; a per-resource contribution ledger keeps
//! repeated ingestion from inflating frequencies and makes removal exact.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text;
use crate::types::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    Filenames,
    Vendors,
    Entities,
    Keywords,
    AllTerms,
}

impl Category {
    fn weight(&self) -> f32 {
        match self {
            Self::Filenames => 1.0,
            Self::Vendors => 0.9,
            Self::Keywords => 0.8,
            Self::Entities => 0.7,
            Self::AllTerms => 0.5,
        }
    }

    fn kind(&self) -> SuggestionKind {
        match self {
            Self::Filenames => SuggestionKind::File,
            Self::Vendors => SuggestionKind::Vendor,
            Self::Entities => SuggestionKind::Entity,
            Self::Keywords => SuggestionKind::Keyword,
            Self::AllTerms => SuggestionKind::Term,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    File,
    Vendor,
    Entity,
    Keyword,
    Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub score: f32,
}

struct TermEntry {
    /// Original-cased form shown to the user; the map key is normalized.
    display: String,
    frequency: u64,
}

#[derive(Default)]
struct SuggestState {
    terms: HashMap<(String, Category), BTreeMap<String, TermEntry>>,
    /// (category, normalized term) pairs each resource contributed.
    contributions: HashMap<Uuid, Vec<(Category, String)>>,
}

pub struct SuggestionIndex {
    state: RwLock<SuggestState>,
    max_terms_per_resource: usize,
}

impl SuggestionIndex {
    pub fn new(max_terms_per_resource: usize) -> Self {
        Self {
            state: RwLock::new(SuggestState::default()),
            max_terms_per_resource,
        }
    }

    /// Idempotent per resource: terms already credited to this resource id
    /// do not bump frequencies again.
    pub fn index_resource(&self, resource: &Resource) {
        let mut candidates: Vec<(Category, String)> = Vec::new();
        candidates.push((Category::Filenames, resource.name.clone()));
        if let Some(vendor) = &resource.vendor {
            candidates.push((Category::Vendors, vendor.clone()));
        }
        for entity in &resource.entities {
            candidates.push((Category::Entities, entity.clone()));
        }
        for keyword in &resource.keywords {
            candidates.push((Category::Keywords, keyword.clone()));
        }
        if let Some(content) = &resource.content {
            let mut seen_tokens = std::collections::HashSet::new();
            for token in text::tokenize(content) {
                if seen_tokens.len() >= self.max_terms_per_resource {
                    break;
                }
                if seen_tokens.insert(token.clone()) {
                    candidates.push((Category::AllTerms, token));
                }
            }
        }

        let mut state = self.state.write();
        for (category, term) in candidates {
            let normalized = text::normalize(&term, true);
            if normalized.is_empty() {
                continue;
            }
            let contributions = state.contributions.entry(resource.id).or_default();
            if contributions
                .iter()
                .any(|(cat, norm)| *cat == category && *norm == normalized)
            {
                continue;
            }
            contributions.push((category, normalized.clone()));

            let bucket = state
                .terms
                .entry((resource.tenant_id.clone(), category))
                .or_default();
            bucket
                .entry(normalized)
                .and_modify(|e| e.frequency += 1)
                .or_insert(TermEntry {
                    display: term,
                    frequency: 1,
                });
        }
    }

    /// Decrement or drop every counter this resource contributed.
    pub fn remove_resource(&self, tenant_id: &str, resource_id: Uuid) {
        let mut state = self.state.write();
        let Some(contributions) = state.contributions.remove(&resource_id) else {
            return;
        };
        for (category, normalized) in contributions {
            let key = (tenant_id.to_string(), category);
            if let Some(bucket) = state.terms.get_mut(&key) {
                if let Some(entry) = bucket.get_mut(&normalized) {
                    entry.frequency = entry.frequency.saturating_sub(1);
                    if entry.frequency == 0 {
                        bucket.remove(&normalized);
                    }
                }
            }
        }
    }

    /// Prefix scan across all categories, scored by
    /// `category_weight × ln(1 + frequency)`, deduplicated by term with
    /// the highest-scoring kind winning.
    pub fn suggest(&self, tenant_id: &str, prefix: &str, limit: usize) -> Vec<Suggestion> {
        let prefix = text::normalize(prefix, true);
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }

        let state = self.state.read();
        let mut best: HashMap<String, Suggestion> = HashMap::new();

        for category in [
            Category::Filenames,
            Category::Vendors,
            Category::Entities,
            Category::Keywords,
            Category::AllTerms,
        ] {
            let Some(bucket) = state.terms.get(&(tenant_id.to_string(), category)) else {
                continue;
            };
            for (normalized, entry) in bucket.range(prefix.clone()..) {
                if !normalized.starts_with(&prefix) {
                    break;
                }
                let score = category.weight() * ((1.0 + entry.frequency as f32).ln());
                let candidate = Suggestion {
                    text: entry.display.clone(),
                    kind: category.kind(),
                    score,
                };
                match best.get(normalized) {
                    Some(existing) if existing.score >= score => {}
                    _ => {
                        best.insert(normalized.clone(), candidate);
                    }
                }
            }
        }

        let mut suggestions: Vec<Suggestion> = best.into_values().collect();
        suggestions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.text.cmp(&b.text))
        });
        suggestions.truncate(limit);
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileKind;
    use chrono::Utc;

    fn resource(tenant: &str, name: &str, vendor: Option<&str>) -> Resource {
        let now = Utc::now();
        Resource {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            owner_id: "owner".to_string(),
            uri: format!("files/{}", name),
            name: name.to_string(),
            description: None,
            mime_type: "application/pdf".to_string(),
            file_kind: FileKind::Pdf,
            size_bytes: 1,
            summary: None,
            content: None,
            tags: Vec::new(),
            vendor: vendor.map(str::to_string),
            currency: None,
            amounts_cents: Vec::new(),
            entities: Vec::new(),
            keywords: Vec::new(),
            dates: Vec::new(),
            invoice_no: None,
            file_id: None,
            file_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn file_and_vendor_suggestions_for_prefix() {
        let index = SuggestionIndex::new(64);
        index.index_resource(&resource("t1", "google cloud invoice.pdf", Some("google")));

        let suggestions = index.suggest("t1", "goo", 10);
        let file = suggestions
            .iter()
            .find(|s| s.kind == SuggestionKind::File)
            .expect("file suggestion present");
        let vendor = suggestions
            .iter()
            .find(|s| s.kind == SuggestionKind::Vendor)
            .expect("vendor suggestion present");
        assert_eq!(file.text, "google cloud invoice.pdf");
        assert_eq!(vendor.text, "google");
        assert!(file.score >= vendor.score);
    }

    #[test]
    fn tenants_never_see_each_other() {
        let index = SuggestionIndex::new(64);
        index.index_resource(&resource("t1", "google report.pdf", None));
        index.index_resource(&resource("t2", "google memo.pdf", None));

        let t1 = index.suggest("t1", "goo", 10);
        assert_eq!(t1.len(), 1);
        assert_eq!(t1[0].text, "google report.pdf");
        assert!(index.suggest("t3", "goo", 10).is_empty());
    }

    #[test]
    fn reindexing_same_resource_does_not_inflate_counts() {
        let index = SuggestionIndex::new(64);
        let r = resource("t1", "budget.pdf", None);
        index.index_resource(&r);
        index.index_resource(&r);

        let first = index.suggest("t1", "bud", 10);
        assert_eq!(first.len(), 1);
        // frequency 1 -> ln(2) * 1.0
        assert!((first[0].score - (2.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn frequency_ranks_popular_terms_higher() {
        let index = SuggestionIndex::new(64);
        for i in 0..5 {
            let mut r = resource("t1", &format!("report-{}.pdf", i), Some("google"));
            r.id = Uuid::new_v4();
            index.index_resource(&r);
        }
        let mut rare = resource("t1", "misc.pdf", Some("goodyear"));
        rare.id = Uuid::new_v4();
        index.index_resource(&rare);

        let suggestions = index.suggest("t1", "goo", 10);
        assert_eq!(suggestions[0].text, "google");
        assert!(suggestions[0].score > suggestions[1].score);
    }

    #[test]
    fn removal_decrements_and_drops_empty_terms() {
        let index = SuggestionIndex::new(64);
        let a = resource("t1", "shared.pdf", Some("google"));
        let mut b = resource("t1", "other.pdf", Some("google"));
        b.id = Uuid::new_v4();
        b.uri = "files/other.pdf".to_string();
        index.index_resource(&a);
        index.index_resource(&b);

        index.remove_resource("t1", a.id);
        let after_one = index.suggest("t1", "google", 10);
        assert_eq!(after_one.len(), 1);

        index.remove_resource("t1", b.id);
        assert!(index.suggest("t1", "google", 10).is_empty());
    }

    #[test]
    fn prefix_is_diacritic_insensitive() {
        let index = SuggestionIndex::new(64);
        index.index_resource(&resource("t1", "datová schránka.pdf", None));

        let suggestions = index.suggest("t1", "datová", 10);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].text, "datová schránka.pdf");
    }

    #[test]
    fn content_terms_are_capped() {
        let index = SuggestionIndex::new(3);
        let mut r = resource("t1", "big.txt", None);
        r.content = Some("alpha beta gamma delta epsilon zeta".to_string());
        index.index_resource(&r);

        let all: Vec<Suggestion> = ["al", "be", "ga", "de", "ep", "ze"]
            .iter()
            .flat_map(|p| index.suggest("t1", p, 10))
            .filter(|s| s.kind == SuggestionKind::Term)
            .collect();
        assert_eq!(all.len(), 3);
    }
}
