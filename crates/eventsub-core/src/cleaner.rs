//! Event type cleaning.
//!
//! Raw event types are free-form dotted strings written by users. Backends
//! only accept a restricted alphabet and bounded lengths, so every raw type
//! goes through a cleaner before it is used as a subject. Cleaning is a
//! pure, deterministic function: the same input and configuration always
//! give the same output, on every replica and across restarts, and cleaning
//! an already clean value returns it unchanged.
//!
//! The pipeline, applied in order:
//!
//! 1. trim and split on `.`
//! 2. drop characters outside the backend alphabet, then drop empty segments
//! 3. strip the configured prefix (segment aligned, repeatedly)
//! 4. cap the application segment and resolve it through the registry
//! 5. split off a trailing version (`v1`, `V2`, ...)
//! 6. join, and if too long keep leading segments plus a digest of the whole

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::CleanError;

/// Hex characters of the digest appended to truncated values.
pub const DIGEST_LEN: usize = 16;

/// Smallest accepted max length. Leaves room for the application segment,
/// the digest and a version.
pub const MIN_MAX_LEN: usize = 64;

static VERSION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[vV][0-9]{1,7}$").expect("version pattern is valid")
});

/// Characters a backend accepts inside a subject segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectAlphabet {
    /// Stream broker subjects: `[A-Za-z0-9_-]`
    Stream,
    /// Event mesh types: `[A-Za-z0-9]`
    Mesh,
}

impl SubjectAlphabet {
    pub fn allows(self, c: char) -> bool {
        match self {
            Self::Stream => c.is_ascii_alphanumeric() || c == '-' || c == '_',
            Self::Mesh => c.is_ascii_alphanumeric(),
        }
    }

    pub fn sanitize(self, segment: &str) -> String {
        segment.chars().filter(|c| self.allows(*c)).collect()
    }
}

/// Turns a raw event type into a value the backend accepts.
pub trait EventTypeCleaner: Send + Sync + Debug {
    fn clean(&self, raw: &str) -> Result<String, CleanError>;

    /// Upper bound on the length of any cleaned value
    fn max_len(&self) -> usize;
}

/// Immutable snapshot of application name to application type mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationRegistry {
    types: BTreeMap<String, String>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application(mut self, name: impl Into<String>, app_type: impl Into<String>) -> Self {
        self.types.insert(name.into(), app_type.into());
        self
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Follow name to type mappings until a name with no mapping is reached.
    /// A cycle resolves to its lexicographically smallest member, so every
    /// member of a cycle resolves to the same value.
    pub fn resolve(&self, name: &str) -> String {
        let mut visited: Vec<&str> = Vec::new();
        let mut current = name;
        loop {
            if let Some(pos) = visited.iter().position(|v| *v == current) {
                return visited[pos..]
                    .iter()
                    .min()
                    .copied()
                    .unwrap_or(current)
                    .to_string();
            }
            match self.types.get(current) {
                Some(next) => {
                    visited.push(current);
                    current = next.as_str();
                }
                None => return current.to_string(),
            }
        }
    }

    /// Registry with keys and values put through the same sanitizing and
    /// capping as application segments. Entries that sanitize to nothing
    /// are dropped.
    fn normalized(&self, alphabet: SubjectAlphabet, cap: usize) -> Self {
        let types = self
            .types
            .iter()
            .filter_map(|(name, app_type)| {
                let name = cap_segment(alphabet.sanitize(name), cap);
                let app_type = cap_segment(alphabet.sanitize(app_type), cap);
                (!name.is_empty() && !app_type.is_empty()).then_some((name, app_type))
            })
            .collect();
        Self { types }
    }
}

impl FromIterator<(String, String)> for ApplicationRegistry {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            types: iter.into_iter().collect(),
        }
    }
}

/// Shared cleaning rules.
#[derive(Debug, Clone)]
struct CleaningRules {
    prefix: Vec<String>,
    alphabet: SubjectAlphabet,
    max_len: usize,
}

impl CleaningRules {
    fn new(prefix: &str, alphabet: SubjectAlphabet, max_len: usize) -> Self {
        let prefix = prefix
            .trim()
            .split('.')
            .map(|s| alphabet.sanitize(s))
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            prefix,
            alphabet,
            max_len: max_len.max(MIN_MAX_LEN),
        }
    }

    fn app_segment_cap(&self) -> usize {
        self.max_len / 2
    }

    fn starts_with_prefix(&self, segments: &[String]) -> bool {
        !self.prefix.is_empty() && segments.starts_with(&self.prefix)
    }

    fn strip_prefix(&self, segments: &mut Vec<String>) {
        while self.starts_with_prefix(segments) {
            segments.drain(..self.prefix.len());
        }
    }

    fn clean_with(
        &self,
        raw: &str,
        resolve_app: impl Fn(&str) -> String,
    ) -> Result<String, CleanError> {
        let mut segments: Vec<String> = raw
            .trim()
            .split('.')
            .map(|s| self.alphabet.sanitize(s))
            .filter(|s| !s.is_empty())
            .collect();

        // Resolution can reintroduce the prefix, so strip until stable.
        loop {
            self.strip_prefix(&mut segments);
            let Some(app) = segments.first_mut() else {
                return Err(CleanError::empty(raw));
            };
            let capped = cap_segment(std::mem::take(app), self.app_segment_cap());
            *app = resolve_app(&capped);
            if !self.starts_with_prefix(&segments) {
                break;
            }
        }

        let has_version = segments.len() > 1
            && segments
                .last()
                .is_some_and(|last| VERSION_SEGMENT.is_match(last));
        let version = if has_version {
            segments.pop().map(|v| v.to_ascii_lowercase())
        } else {
            None
        };

        let mut joined = segments.join(".");
        if let Some(version) = &version {
            joined.push('.');
            joined.push_str(version);
        }
        if joined.len() <= self.max_len {
            return Ok(joined);
        }

        Ok(self.truncate(&segments, version.as_deref(), &joined))
    }

    /// Keep as many leading segments as fit, then the digest of the full
    /// value and the version.
    fn truncate(&self, segments: &[String], version: Option<&str>, joined: &str) -> String {
        let digest = &digest_hex(joined)[..DIGEST_LEN];
        let tail = match version {
            Some(v) => format!("{digest}.{v}"),
            None => digest.to_string(),
        };
        let budget = self.max_len - tail.len() - 1;

        let mut head: Vec<String> = Vec::new();
        let mut used = 0;
        for segment in segments {
            let sep = usize::from(!head.is_empty());
            if used + sep + segment.len() <= budget {
                used += sep + segment.len();
                head.push(segment.clone());
                continue;
            }
            let room = budget.saturating_sub(used + sep);
            if room > 0 && !head.is_empty() {
                let mut candidate = head.clone();
                candidate.push(segment[..room].to_string());
                if !self.starts_with_prefix(&candidate) {
                    head = candidate;
                }
            }
            break;
        }

        format!("{}.{}", head.join("."), tail)
    }
}

/// Cleaner that strips a fixed prefix and leaves application names as is.
#[derive(Debug, Clone)]
pub struct PrefixCleaner {
    rules: CleaningRules,
}

impl PrefixCleaner {
    pub fn new(prefix: &str, alphabet: SubjectAlphabet, max_len: usize) -> Self {
        Self {
            rules: CleaningRules::new(prefix, alphabet, max_len),
        }
    }
}

impl EventTypeCleaner for PrefixCleaner {
    fn clean(&self, raw: &str) -> Result<String, CleanError> {
        self.rules.clean_with(raw, str::to_string)
    }

    fn max_len(&self) -> usize {
        self.rules.max_len
    }
}

/// Cleaner that also maps the application segment through an
/// [`ApplicationRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryCleaner {
    rules: CleaningRules,
    registry: ApplicationRegistry,
}

impl RegistryCleaner {
    pub fn new(
        registry: &ApplicationRegistry,
        prefix: &str,
        alphabet: SubjectAlphabet,
        max_len: usize,
    ) -> Self {
        let rules = CleaningRules::new(prefix, alphabet, max_len);
        let registry = registry.normalized(alphabet, rules.app_segment_cap());
        Self { rules, registry }
    }
}

impl EventTypeCleaner for RegistryCleaner {
    fn clean(&self, raw: &str) -> Result<String, CleanError> {
        self.rules.clean_with(raw, |app| self.registry.resolve(app))
    }

    fn max_len(&self) -> usize {
        self.rules.max_len
    }
}

fn digest_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Shorten a segment to `cap` characters, replacing its tail with a digest
/// of the full segment. Input must be ASCII.
fn cap_segment(segment: String, cap: usize) -> String {
    if segment.len() <= cap {
        return segment;
    }
    let keep = cap.saturating_sub(DIGEST_LEN);
    let digest = digest_hex(&segment);
    format!("{}{}", &segment[..keep], &digest[..DIGEST_LEN.min(cap)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_cleaner() -> PrefixCleaner {
        PrefixCleaner::new("sap.kyma", SubjectAlphabet::Stream, 128)
    }

    #[test]
    fn test_clean_simple_type_is_unchanged() {
        let cleaner = stream_cleaner();
        assert_eq!(cleaner.clean("order.created.v1").unwrap(), "order.created.v1");
    }

    #[test]
    fn test_clean_removes_illegal_characters() {
        let cleaner = stream_cleaner();
        assert_eq!(
            cleaner.clean("  Order-App.created!.V1 ").unwrap(),
            "Order-App.created.v1"
        );

        let mesh = PrefixCleaner::new("", SubjectAlphabet::Mesh, 100);
        assert_eq!(mesh.clean("order-app.created_now.v1").unwrap(), "orderapp.creatednow.v1");
    }

    #[test]
    fn test_clean_drops_empty_segments() {
        let cleaner = stream_cleaner();
        assert_eq!(cleaner.clean("order..created.$.v1").unwrap(), "order.created.v1");
    }

    #[test]
    fn test_clean_strips_prefix_repeatedly_on_segment_boundaries() {
        let cleaner = stream_cleaner();
        assert_eq!(
            cleaner.clean("sap.kyma.sap.kyma.order.created.v1").unwrap(),
            "order.created.v1"
        );
        // "sap.kymafoo" does not start with the segment "kyma"
        assert_eq!(
            cleaner.clean("sap.kymafoo.created").unwrap(),
            "sap.kymafoo.created"
        );
    }

    #[test]
    fn test_clean_empty_results_are_errors() {
        let cleaner = stream_cleaner();
        assert_eq!(cleaner.clean(""), Err(CleanError::empty("")));
        assert!(cleaner.clean(" ..!!. ").is_err());
        assert!(cleaner.clean("sap.kyma").is_err());
    }

    #[test]
    fn test_version_needs_more_than_one_segment() {
        let cleaner = stream_cleaner();
        assert_eq!(cleaner.clean("V1").unwrap(), "V1");
        assert_eq!(cleaner.clean("order.V12").unwrap(), "order.v12");
        assert_eq!(cleaner.clean("order.v12345678").unwrap(), "order.v12345678");
    }

    #[test]
    fn test_long_types_are_truncated_with_digest_and_version() {
        let cleaner = PrefixCleaner::new("", SubjectAlphabet::Stream, 64);
        let raw = format!("app.{}.{}.v2", "a".repeat(40), "b".repeat(40));
        let cleaned = cleaner.clean(&raw).unwrap();

        assert!(cleaned.len() <= 64, "{cleaned} too long");
        assert!(cleaned.starts_with("app.aaaa"));
        assert!(cleaned.ends_with(".v2"));
        assert_eq!(cleaner.clean(&cleaned).unwrap(), cleaned);

        let other = format!("app.{}.{}.v2", "a".repeat(40), "c".repeat(40));
        assert_ne!(cleaner.clean(&other).unwrap(), cleaned);
    }

    #[test]
    fn test_long_application_segment_is_capped() {
        let cleaner = PrefixCleaner::new("", SubjectAlphabet::Stream, 64);
        let raw = format!("{}.created", "x".repeat(80));
        let cleaned = cleaner.clean(&raw).unwrap();
        let app = cleaned.split('.').next().unwrap();
        assert_eq!(app.len(), 32);
        assert_eq!(cleaner.clean(&cleaned).unwrap(), cleaned);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let registry = ApplicationRegistry::new()
            .with_application("shop-app", "commerce")
            .with_application("legacy", "shop-app");
        let cleaners: Vec<Box<dyn EventTypeCleaner>> = vec![
            Box::new(stream_cleaner()),
            Box::new(PrefixCleaner::new("", SubjectAlphabet::Mesh, 64)),
            Box::new(RegistryCleaner::new(
                &registry,
                "sap.kyma",
                SubjectAlphabet::Stream,
                64,
            )),
        ];
        let inputs = [
            "order.created.v1",
            "sap.kyma.legacy.order.created.V3",
            "shop-app.Order_Created",
            "a.b.c.d.e.f.g.h.i.j.k.l.m.n.o.p.q.r.s.t.u.v.w.x.y.z.aa.bb.cc.dd.ee.v9",
            "  $$weird..chars##.here ",
        ];
        for cleaner in &cleaners {
            for input in inputs {
                let once = cleaner.clean(input).unwrap();
                assert!(once.len() <= cleaner.max_len());
                assert_eq!(cleaner.clean(&once).unwrap(), once, "input {input:?}");
            }
        }
    }

    #[test]
    fn test_registry_resolves_application_segment() {
        let registry = ApplicationRegistry::new()
            .with_application("legacy", "shop-app")
            .with_application("shop-app", "commerce");
        let cleaner = RegistryCleaner::new(&registry, "", SubjectAlphabet::Stream, 128);

        assert_eq!(cleaner.clean("legacy.order.created").unwrap(), "commerce.order.created");
        assert_eq!(cleaner.clean("unknown.order.created").unwrap(), "unknown.order.created");
        // only the application segment is mapped
        assert_eq!(cleaner.clean("x.legacy").unwrap(), "x.legacy");
    }

    #[test]
    fn test_registry_cycle_resolves_to_smallest_member() {
        let registry = ApplicationRegistry::new()
            .with_application("b", "c")
            .with_application("c", "a")
            .with_application("a", "b");
        assert_eq!(registry.resolve("a"), "a");
        assert_eq!(registry.resolve("b"), "a");
        assert_eq!(registry.resolve("c"), "a");

        let self_loop = ApplicationRegistry::new().with_application("x", "x");
        assert_eq!(self_loop.resolve("x"), "x");
    }

    #[test]
    fn test_registry_resolution_reintroducing_prefix_is_stripped() {
        let registry = ApplicationRegistry::new().with_application("alias", "sap");
        let cleaner = RegistryCleaner::new(&registry, "sap.kyma", SubjectAlphabet::Stream, 128);
        assert_eq!(
            cleaner.clean("alias.kyma.order.created").unwrap(),
            "order.created"
        );
    }

    #[test]
    fn test_cleaning_is_deterministic_across_instances() {
        let a = stream_cleaner();
        let b = stream_cleaner();
        let raw = format!("app.{}", "segment.".repeat(30));
        assert_eq!(a.clean(&raw).unwrap(), b.clean(&raw).unwrap());
    }
}
