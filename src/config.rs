//! Environment-driven configuration for the collectors, the dispatch
//! filter, and the oracle endpoint.

use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

const DEFAULT_MAX_DEPTH: usize = 10;
const DEFAULT_MAX_OBJECTS: usize = 100;
const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000/solve";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

fn env_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

/// Heap-slice collection bounds.
#[derive(Debug, Clone)]
pub struct HeapSliceConfig {
    pub max_depth: usize,
    pub max_objects: usize,
    pub irrelevant_fields: BTreeSet<String>,
}

impl Default for HeapSliceConfig {
    fn default() -> Self {
        // Fields that usually do not affect path conditions. Policy, not
        // contract; override via HEAP_SLICE_IRRELEVANT_FIELDS.
        let irrelevant_fields = [
            "modCount",
            "size",
            "capacity",
            "hash",
            "threshold",
            "loadFactor",
            "EMPTY_ELEMENTDATA",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_objects: DEFAULT_MAX_OBJECTS,
            irrelevant_fields,
        }
    }
}

impl HeapSliceConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.max_depth = env_usize("HEAP_SLICE_MAX_DEPTH", cfg.max_depth);
        cfg.max_objects = env_usize("HEAP_SLICE_MAX_OBJECTS", cfg.max_objects);
        if let Some(fields) = env_csv("HEAP_SLICE_IRRELEVANT_FIELDS") {
            cfg.irrelevant_fields = fields.into_iter().collect();
        }
        cfg
    }

    pub fn irrelevant(&self, field: &str) -> bool {
        self.irrelevant_fields.contains(field)
    }
}

/// Source-context collection windows and caps.
#[derive(Debug, Clone)]
pub struct SourceContextConfig {
    pub context_lines: usize,
    pub include_full_class: bool,
    pub include_line_numbers: bool,
    pub max_method_source_length: usize,
    pub max_class_source_length: usize,
    pub max_related_class_length: usize,
}

impl Default for SourceContextConfig {
    fn default() -> Self {
        Self {
            context_lines: 5,
            include_full_class: false,
            include_line_numbers: true,
            max_method_source_length: 3_000,
            max_class_source_length: 8_000,
            max_related_class_length: 2_000,
        }
    }
}

impl SourceContextConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.context_lines = env_usize("SOURCE_CONTEXT_LINES", cfg.context_lines);
        cfg.include_full_class = env_bool("SOURCE_INCLUDE_FULL_CLASS", cfg.include_full_class);
        cfg.max_method_source_length =
            env_usize("SOURCE_MAX_METHOD_LEN", cfg.max_method_source_length);
        cfg.max_class_source_length = env_usize("SOURCE_MAX_CLASS_LEN", cfg.max_class_source_length);
        cfg.max_related_class_length =
            env_usize("SOURCE_MAX_RELATED_LEN", cfg.max_related_class_length);
        cfg
    }
}

/// Dispatch-instrumentation inclusion filter: `*` matches everything, a bare
/// name matches exactly, `pkg.*` matches by prefix.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub filter_enabled: bool,
    pub packages: Vec<String>,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self {
            filter_enabled: env_bool("POLYMORPHIC_FILTER_ENABLED", false),
            packages: env_csv("POLYMORPHIC_PACKAGES").unwrap_or_default(),
        }
    }

    /// Whether instrumentation applies to the given declared type.
    pub fn admits(&self, declared_type: &str) -> bool {
        if !self.filter_enabled {
            return true;
        }
        self.packages.iter().any(|pat| {
            if pat == "*" {
                return true;
            }
            if let Some(prefix) = pat.strip_suffix(".*") {
                return declared_type == prefix
                    || declared_type.starts_with(&format!("{prefix}."));
            }
            declared_type == pat
        })
    }
}

/// Oracle endpoint configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub service_url: String,
    pub timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Self {
        let service_url = env::var("SERVICE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        let timeout_secs = env::var("TIMEOUT_SECONDS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        Self { service_url, timeout: Duration::from_secs(timeout_secs) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_irrelevant_fields() {
        let cfg = HeapSliceConfig::default();
        assert!(cfg.irrelevant("modCount"));
        assert!(cfg.irrelevant("loadFactor"));
        assert!(!cfg.irrelevant("next"));
    }

    #[test]
    fn test_dispatch_filter_patterns() {
        let cfg = DispatchConfig {
            filter_enabled: true,
            packages: vec!["demo.*".to_string(), "Node".to_string()],
        };
        assert!(cfg.admits("demo.Dog"));
        assert!(cfg.admits("demo"));
        assert!(cfg.admits("Node"));
        assert!(!cfg.admits("other.Dog"));
        assert!(!cfg.admits("demolition.Dog"));

        let wildcard = DispatchConfig { filter_enabled: true, packages: vec!["*".to_string()] };
        assert!(wildcard.admits("anything.at.All"));

        let disabled = DispatchConfig { filter_enabled: false, packages: vec![] };
        assert!(disabled.admits("anything"));
    }

    #[test]
    fn test_oracle_defaults() {
        let cfg = OracleConfig::default();
        assert_eq!(cfg.service_url, "http://127.0.0.1:8000/solve");
        assert_eq!(cfg.timeout, Duration::from_secs(60));
    }
}
