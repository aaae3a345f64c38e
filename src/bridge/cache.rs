//! Bridge response cache: TTL-bounded, capacity-bounded, keyed by a
//! stable hash of (normalized query text, diabetes type, glucose
//! bucket). Eviction removes the least-recently-inserted entry.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::context::GlucoseBucket;
use crate::models::datum::Datum;
use crate::models::enums::DiabetesType;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_query(text: &str) -> String {
    static STRIP: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let strip = STRIP.get_or_init(|| Regex::new(r"[^a-z0-9 ]+").expect("static regex"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("static regex"));

    let lowered = text.to_lowercase();
    let stripped = strip.replace_all(&lowered, " ");
    spaces.replace_all(stripped.trim(), " ").trim().to_string()
}

/// Stable cache key over the normalized inputs.
pub fn cache_key(
    normalized_query: &str,
    diabetes_type: Datum<DiabetesType>,
    bucket: GlucoseBucket,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_query.as_bytes());
    hasher.update([0x1f]);
    hasher.update(
        diabetes_type
            .as_known()
            .map(|d| d.as_str())
            .unwrap_or("unknown")
            .as_bytes(),
    );
    hasher.update([0x1f]);
    hasher.update(bucket.as_str().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub content: String,
    pub model: String,
    inserted_at: Instant,
}

pub struct ResponseCache {
    entries: HashMap<String, CachedResponse>,
    insertion_order: VecDeque<String>,
    ttl: Duration,
    max_entries: usize,
    hits: u64,
    misses: u64,
}

impl ResponseCache {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl: Duration::from_secs(ttl_secs),
            max_entries: max_entries.max(1),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<CachedResponse> {
        match self.entries.get(key) {
            Some(cached) if cached.inserted_at.elapsed() < self.ttl => {
                self.hits += 1;
                Some(cached.clone())
            }
            Some(_) => {
                // Expired: drop it so capacity accounting stays honest
                self.entries.remove(key);
                self.insertion_order.retain(|k| k != key);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: String, content: String, model: String) {
        if self.entries.contains_key(&key) {
            // Refresh content without disturbing insertion order
            self.entries.insert(
                key,
                CachedResponse {
                    content,
                    model,
                    inserted_at: Instant::now(),
                },
            );
            return;
        }

        while self.entries.len() >= self.max_entries {
            match self.insertion_order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        self.insertion_order.push_back(key.clone());
        self.entries.insert(
            key,
            CachedResponse {
                content,
                model,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_case_punctuation_whitespace() {
        assert_eq!(
            normalize_query("  Morning glucose is 310,   should I DOUBLE my metformin?! "),
            "morning glucose is 310 should i double my metformin"
        );
        assert_eq!(normalize_query("check-up"), "check up");
    }

    #[test]
    fn key_is_stable_for_identical_inputs() {
        let a = cache_key(
            "same question",
            Datum::known(DiabetesType::Type2),
            GlucoseBucket::InRange,
        );
        let b = cache_key(
            "same question",
            Datum::known(DiabetesType::Type2),
            GlucoseBucket::InRange,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_varies_with_each_component() {
        let base = cache_key(
            "question",
            Datum::known(DiabetesType::Type2),
            GlucoseBucket::InRange,
        );
        assert_ne!(
            base,
            cache_key(
                "different question",
                Datum::known(DiabetesType::Type2),
                GlucoseBucket::InRange
            )
        );
        assert_ne!(
            base,
            cache_key("question", Datum::known(DiabetesType::Type1), GlucoseBucket::InRange)
        );
        assert_ne!(
            base,
            cache_key("question", Datum::known(DiabetesType::Type2), GlucoseBucket::Low)
        );
        assert_ne!(
            base,
            cache_key("question", Datum::Unknown, GlucoseBucket::InRange)
        );
    }

    #[test]
    fn hit_returns_byte_identical_content() {
        let mut cache = ResponseCache::new(300, 100);
        cache.put("k1".into(), "exact response text".into(), "clinical-llm-2".into());

        let first = cache.get("k1").unwrap();
        let second = cache.get("k1").unwrap();
        assert_eq!(first.content, "exact response text");
        assert_eq!(first.content, second.content);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn miss_and_expiry_are_counted() {
        let mut cache = ResponseCache::new(0, 100); // zero TTL: instant expiry
        assert!(cache.get("absent").is_none());
        cache.put("k1".into(), "text".into(), "m".into());
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.misses(), 2);
        assert_eq!(cache.len(), 0, "expired entry is dropped");
    }

    #[test]
    fn capacity_evicts_least_recently_inserted() {
        let mut cache = ResponseCache::new(300, 2);
        cache.put("a".into(), "1".into(), "m".into());
        cache.put("b".into(), "2".into(), "m".into());
        cache.put("c".into(), "3".into(), "m".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none(), "oldest insertion evicted");
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn refresh_keeps_insertion_position() {
        let mut cache = ResponseCache::new(300, 2);
        cache.put("a".into(), "1".into(), "m".into());
        cache.put("b".into(), "2".into(), "m".into());
        cache.put("a".into(), "1-updated".into(), "m".into());
        cache.put("c".into(), "3".into(), "m".into());

        // "a" kept its original (oldest) position, so it is evicted
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").unwrap().content, "2");
        assert_eq!(cache.get("c").unwrap().content, "3");
    }
}
