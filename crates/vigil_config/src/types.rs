//! Configuration types deserialized from `vigil.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use vigil_common::ByteSize;

/// The top-level configuration parsed from `vigil.toml`.
///
/// Every section is optional; omitted sections take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VigilConfig {
    /// Budgets, timers and storage location of the cache.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Import scanning and specifier resolution settings.
    #[serde(default)]
    pub resolver: ResolverSettings,
    /// Per-namespace validity policies (e.g. `[namespaces.git-analysis]`).
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceSettings>,
}

impl VigilConfig {
    /// Returns the policy for a namespace, falling back to the default
    /// (content-hash validity only) for namespaces without a section.
    pub fn namespace(&self, name: &str) -> NamespaceSettings {
        self.namespaces.get(name).cloned().unwrap_or_default()
    }
}

/// Cache budgets and timers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding `index.json` and payload blobs.
    pub dir: PathBuf,
    /// Upper bound on the summed serialized payload size of all entries.
    pub max_bytes: ByteSize,
    /// Maximum import depth followed by the dependency resolver.
    pub max_dependency_depth: usize,
    /// Validity window for entries whose dependency closure is not fully known.
    pub unresolved_ttl_ms: u64,
    /// Quiet period after the last mutation before the index is written.
    pub save_debounce_ms: u64,
    /// How long startup waits for the persisted index before starting cold.
    pub load_timeout_ms: u64,
    /// Payloads larger than this are written as separate blob files.
    pub inline_payload_limit: ByteSize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".vigil-cache"),
            max_bytes: ByteSize::mib(50),
            max_dependency_depth: 3,
            unresolved_ttl_ms: 120_000,
            save_debounce_ms: 2_000,
            load_timeout_ms: 5_000,
            inline_payload_limit: ByteSize::kib(64),
        }
    }
}

impl CacheSettings {
    /// Returns the unresolved-dependency TTL as a [`Duration`].
    pub fn unresolved_ttl(&self) -> Duration {
        Duration::from_millis(self.unresolved_ttl_ms)
    }

    /// Returns the save debounce window as a [`Duration`].
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// Returns the startup load timeout as a [`Duration`].
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Settings for the static import scanner.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Extensions tried when a specifier omits one (without the leading dot).
    ///
    /// Accepts either a single string or a list of strings.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub extensions: Vec<String>,
    /// Directory names whose contents are external packages, never dependencies.
    #[serde(deserialize_with = "deserialize_string_or_vec")]
    pub package_dirs: Vec<String>,
    /// Specifier prefixes rewritten relative to the project root
    /// (e.g. `"@/" = "src/"`).
    pub aliases: BTreeMap<String, String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            extensions: ["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "h", "hpp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            package_dirs: ["node_modules", "site-packages", ".venv", "vendor", "target"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aliases: BTreeMap::new(),
        }
    }
}

/// Validity policy for one namespace.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NamespaceSettings {
    /// Hard expiry in milliseconds from entry creation, applied in addition to
    /// content hashing. Used for results derived from state that is not
    /// content-hashable, such as the current git branch.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl NamespaceSettings {
    /// Returns the namespace TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Deserializes a field that can be either a single string or a list of strings.
fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrVec;

    impl<'de> Visitor<'de> for StringOrVec {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut vec = Vec::new();
            while let Some(val) = seq.next_element::<String>()? {
                vec.push(val);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(StringOrVec)
}
