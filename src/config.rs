//! Worker configuration and routing rules.
//!
//! Both documents are JSON. A missing file falls back to the built-in
//! defaults (with a warning); a file that exists but does not parse is an
//! error. The loaded objects are passed by reference into every component
//! constructor and are never reloaded while the process runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::classify::Priority;
use crate::pipeline::provenance::IntegrityPolicy;

/// Application-level constants
pub const APP_NAME: &str = "ScanRoute";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the worker config file.
pub const CONFIG_ENV_VAR: &str = "SCANROUTE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the application data directory.
/// ~/ScanRoute/ on all platforms, or ./ScanRoute when no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the worker config file.
pub fn default_config_path() -> PathBuf {
    app_data_dir().join("Rules").join("worker_config.json")
}

// ---------------------------------------------------------------------------
// Worker configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub classification: ClassificationConfig,
    pub polling: PollingConfig,
    pub naming: NamingConfig,
    pub ocr: OcrConfig,
    pub provenance: ProvenanceConfig,
    pub delivery: DeliveryConfig,
    pub mail: MailConfig,
    pub forwarding: ForwardingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::rooted_at(&app_data_dir())
    }
}

impl WorkerConfig {
    /// Defaults with every filesystem root placed under `base`.
    pub fn rooted_at(base: &Path) -> Self {
        let paths = PathsConfig::rooted_at(base);
        let logging = LoggingConfig {
            csv_log: paths.logs_dir.join("worker_log.csv"),
            level: "INFO".into(),
            metadata_store: paths.logs_dir.join("documents.db"),
        };
        let forwarding = ForwardingConfig {
            outbox_dir: base.join("data").join("outbox"),
            ..ForwardingConfig::default()
        };
        Self {
            paths,
            logging,
            classification: ClassificationConfig::default(),
            polling: PollingConfig::default(),
            naming: NamingConfig::default(),
            ocr: OcrConfig::default(),
            provenance: ProvenanceConfig::default(),
            delivery: DeliveryConfig::default(),
            mail: MailConfig::default(),
            forwarding,
        }
    }

    /// Load the worker config. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let Some(config) = read_json::<Self>(path)? else {
            tracing::warn!(path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.classification.min_confidence;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::Invalid(format!(
                "classification.min_confidence must be within [0, 1], got {min}"
            )));
        }
        if self.delivery.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_scans_dir: PathBuf,
    pub needs_review_dir: PathBuf,
    pub duplicate_hold_dir: PathBuf,
    pub ocr_text_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub rules_file: PathBuf,
    pub personal_storage_dir: PathBuf,
    /// Where mail attachments land before processing.
    pub intake_queue_dir: PathBuf,
    /// Root of the per-route folders used by remote delivery decisions.
    pub processed_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self::rooted_at(&app_data_dir())
    }
}

impl PathsConfig {
    pub fn rooted_at(base: &Path) -> Self {
        let data = base.join("data");
        Self {
            raw_scans_dir: data.join("incoming"),
            needs_review_dir: data.join("needs_review"),
            duplicate_hold_dir: data.join("duplicate_hold"),
            ocr_text_dir: data.join("ocr_text"),
            staging_dir: data.join("staging"),
            temp_dir: data.join("temp"),
            logs_dir: base.join("logs"),
            rules_file: base.join("Rules").join("routing_rules.json"),
            personal_storage_dir: data.join("personal").join("secure"),
            intake_queue_dir: data.join("intake_queue"),
            processed_dir: data.join("processed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub csv_log: PathBuf,
    pub level: String,
    pub metadata_store: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        WorkerConfig::default().logging
    }
}

impl LoggingConfig {
    /// Map the configured level name onto a tracing filter directive.
    pub fn filter_directive(&self) -> &'static str {
        match self.level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "WARN" | "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassificationConfig {
    pub min_confidence: f32,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self { min_confidence: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub stability_check_seconds: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            stability_check_seconds: 2,
            allowed_extensions: [".pdf", ".png", ".jpg", ".jpeg", ".tif", ".tiff"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NamingConfig {
    pub client_code: String,
    pub entity_code: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            client_code: "GEN".into(),
            entity_code: "MAIN".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    /// Vendor OCR command template. The file path is appended, or substituted
    /// at every `{path}` placeholder when one is present.
    pub command: Option<String>,
    pub command_timeout_seconds: u64,
    pub tesseract_binary: String,
    pub engine_timeout_seconds: u64,
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: None,
            command_timeout_seconds: 60,
            tesseract_binary: "tesseract".into(),
            engine_timeout_seconds: 120,
            language: "eng".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub enabled: bool,
    pub on_mismatch: IntegrityPolicy,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            on_mismatch: IntegrityPolicy::Warn,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    pub endpoint: String,
    pub max_retries: u32,
    pub backoff_seconds: u64,
    pub timeout_seconds: u64,
    /// Upper-cased route → folder under `paths.processed_dir`.
    pub route_dirs: BTreeMap<String, String>,
    pub fallback_route: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let route_dirs = [
            ("AP", "ap"),
            ("AR", "ar"),
            ("CLIENT", "client"),
            ("ADMIN", "admin"),
            ("ARCHIVE", "archive"),
        ]
        .into_iter()
        .map(|(route, dir)| (route.to_string(), dir.to_string()))
        .collect();
        Self {
            endpoint: "https://example.workers.dev".into(),
            max_retries: 3,
            backoff_seconds: 3,
            timeout_seconds: 30,
            route_dirs,
            fallback_route: "ARCHIVE".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailConfig {
    pub allowed_extensions: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: [".pdf", ".png", ".jpg", ".jpeg"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwardingConfig {
    pub enabled: bool,
    pub books_email: String,
    pub sender_email: String,
    pub outbox_dir: PathBuf,
    pub subject_prefix: String,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            books_email: String::new(),
            sender_email: String::new(),
            outbox_dir: app_data_dir().join("data").join("outbox"),
            subject_prefix: "DocumentHub Forward".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routing rules
// ---------------------------------------------------------------------------

/// One keyword → route rule. Rules are evaluated in file order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRoute {
    pub tag: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Externally supplied routing rules.
///
/// `priorities` keeps the order of the JSON object: the classifier's
/// last-match-wins tie-break depends on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingRules {
    #[serde(default = "default_fallback_tag")]
    pub fallback_tag: String,
    #[serde(default, with = "ordered_priorities")]
    pub priorities: Vec<(Priority, Vec<String>)>,
    #[serde(default)]
    pub keyword_routes: Vec<KeywordRoute>,
    #[serde(default)]
    pub document_type_routes: BTreeMap<String, String>,
}

fn default_fallback_tag() -> String {
    "Misc".into()
}

impl Default for RoutingRules {
    fn default() -> Self {
        fn words(list: &[&str]) -> Vec<String> {
            list.iter().map(|w| w.to_string()).collect()
        }
        Self {
            fallback_tag: default_fallback_tag(),
            priorities: vec![
                (Priority::P1, words(&["urgent", "overdue"])),
                (Priority::P2, words(&["invoice", "statement"])),
            ],
            keyword_routes: vec![
                KeywordRoute {
                    tag: "AP".into(),
                    keywords: words(&["invoice", "purchase order", "vendor"]),
                },
                KeywordRoute {
                    tag: "AR".into(),
                    keywords: words(&["receipt", "payment"]),
                },
            ],
            document_type_routes: [("invoice", "AP"), ("receipt", "AR")]
                .into_iter()
                .map(|(t, r)| (t.to_string(), r.to_string()))
                .collect(),
        }
    }
}

impl RoutingRules {
    /// Load routing rules. A missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match read_json::<Self>(path)? {
            Some(rules) => Ok(rules),
            None => {
                tracing::warn!(path = %path.display(), "Routing rules missing, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Serde adapter that reads a JSON object into an ordered list of pairs.
mod ordered_priorities {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    use crate::pipeline::classify::Priority;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(
        value: &Vec<(Priority, Vec<String>)>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(value.iter().map(|(p, k)| (p, k)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(Priority, Vec<String>)>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(Priority, Vec<String>)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of priority level to keyword list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((priority, keywords)) =
                    access.next_entry::<Priority, Vec<String>>()?
                {
                    out.push((priority, keywords));
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Read and parse a JSON file. `Ok(None)` when the file does not exist.
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
