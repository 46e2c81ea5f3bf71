//! Canonical fact sheets
//!
//! A source document is a JSON object, either
//!
//! ```json
//! {"facts": {"close_price": {"value": 101.2, "kind": "price", "aliases": ["close"]}}}
//! ```
//!
//! or a flat object whose scalar members are facts (`{"close_price": "$101.20"}`).
//! Kinds not given explicitly are inferred from the value and field name.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cached::{Cached, TimedCache};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::extract::ClaimMatcher;
use crate::{Result, SanitizerError};

/// What sort of value a fact holds, which decides how claims are parsed and compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Price,
    Percent,
    Number,
    Date,
    Label,
}

impl FactKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FactKind::Price | FactKind::Percent | FactKind::Number)
    }

    fn infer_numeric(field: &str) -> Self {
        let field = field.to_ascii_lowercase();
        if field.ends_with("_pct") || field.contains("percent") {
            FactKind::Percent
        } else if field.contains("price") {
            FactKind::Price
        } else {
            FactKind::Number
        }
    }
}

/// Canonical value of a fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Number(f64),
    Text(String),
}

/// One canonical field with the aliases it may be referred to by
#[derive(Debug, Clone)]
pub struct Fact {
    pub field: String,
    pub kind: FactKind,
    pub value: FactValue,
    /// Aliases, longest first
    pub aliases: Vec<String>,
    /// Canonical value as written into corrected text
    pub display: String,
    pub(crate) matcher: ClaimMatcher,
}

impl Fact {
    pub fn new(
        field: impl Into<String>,
        kind: FactKind,
        value: FactValue,
        extra_aliases: &[String],
    ) -> Result<Self> {
        let field = field.into();
        let display = match (&value, kind) {
            (FactValue::Number(n), FactKind::Price) => price_display(*n),
            (FactValue::Number(n), _) => n.to_string(),
            (FactValue::Text(t), _) => t.clone(),
        };

        let mut aliases: Vec<String> = Vec::new();
        let spaced = field.replace('_', " ");
        for alias in extra_aliases.iter().map(String::as_str).chain([field.as_str(), spaced.as_str()]) {
            let alias = alias.trim();
            if !alias.is_empty() && !aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
                aliases.push(alias.to_string());
            }
        }
        aliases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let matcher = ClaimMatcher::new(kind, &aliases)?;

        Ok(Self {
            field,
            kind,
            value,
            aliases,
            display,
            matcher,
        })
    }
}

/// Cents for ordinary prices; sub-cent prices keep every digit.
fn price_display(n: f64) -> String {
    let cents = format!("{n:.2}");
    match cents.parse::<f64>() {
        Ok(rounded) if (rounded - n).abs() <= 1e-9 => cents,
        _ => n.to_string(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFact {
    Detailed {
        value: Value,
        #[serde(default)]
        kind: Option<FactKind>,
        #[serde(default)]
        aliases: Vec<String>,
    },
    Scalar(Value),
}

fn parse_number(field: &str, raw: &str) -> Result<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('$')
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned
        .parse()
        .map_err(|_| SanitizerError::InvalidFacts(format!("{field}: '{raw}' is not a number")))
}

fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

fn infer_text_kind(s: &str) -> FactKind {
    if s.starts_with('$') {
        FactKind::Price
    } else if s.ends_with('%') {
        FactKind::Percent
    } else if is_iso_date(s) {
        FactKind::Date
    } else if s.replace(',', "").parse::<f64>().is_ok() {
        FactKind::Number
    } else {
        FactKind::Label
    }
}

/// Normalise one raw member; `None` for members that are not facts.
fn normalize(field: &str, value: &Value, kind: Option<FactKind>) -> Result<Option<(FactKind, FactValue)>> {
    match value {
        Value::Number(n) => {
            let n = n.as_f64().ok_or_else(|| {
                SanitizerError::InvalidFacts(format!("{field}: number out of range"))
            })?;
            let kind = kind.unwrap_or_else(|| FactKind::infer_numeric(field));
            if !kind.is_numeric() {
                return Err(SanitizerError::InvalidFacts(format!(
                    "{field}: numeric value given for a {kind:?} fact"
                )));
            }
            Ok(Some((kind, FactValue::Number(n))))
        }
        Value::String(s) => {
            let s = s.trim();
            let kind = kind.unwrap_or_else(|| infer_text_kind(s));
            let value = match kind {
                FactKind::Price | FactKind::Percent | FactKind::Number => {
                    FactValue::Number(parse_number(field, s)?)
                }
                FactKind::Date if !is_iso_date(s) => {
                    return Err(SanitizerError::InvalidFacts(format!(
                        "{field}: '{s}' is not a YYYY-MM-DD date"
                    )));
                }
                FactKind::Date | FactKind::Label => FactValue::Text(s.to_string()),
            };
            Ok(Some((kind, value)))
        }
        _ => Ok(None),
    }
}

/// The canonical facts of one source document
#[derive(Debug, Clone, Default)]
pub struct FactSheet {
    facts: Vec<Fact>,
}

impl FactSheet {
    pub fn new(facts: Vec<Fact>) -> Self {
        Self { facts }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_value(&serde_json::from_str(json)?)
    }

    pub fn from_value(document: &Value) -> Result<Self> {
        let root = document
            .as_object()
            .ok_or_else(|| SanitizerError::InvalidFacts("document is not a JSON object".into()))?;
        let members = match root.get("facts") {
            Some(Value::Object(facts)) => facts,
            Some(_) => {
                return Err(SanitizerError::InvalidFacts("`facts` must be an object".into()));
            }
            None => root,
        };

        let mut facts = Vec::with_capacity(members.len());
        for (field, raw) in members {
            let (value, kind, aliases) = match serde_json::from_value::<RawFact>(raw.clone())? {
                RawFact::Detailed {
                    value,
                    kind,
                    aliases,
                } => (value, kind, aliases),
                RawFact::Scalar(value) => (value, None, Vec::new()),
            };
            match normalize(field, &value, kind)? {
                Some((kind, value)) => facts.push(Fact::new(field.clone(), kind, value, &aliases)?),
                None => debug!(field = %field, "skipping non-scalar member"),
            }
        }
        Ok(Self { facts })
    }

    /// Read and parse the fact sheet at `path`.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SanitizerError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, field: &str) -> Option<&Fact> {
        self.facts.iter().find(|fact| fact.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Parsed fact sheets keyed by path, expiring after a fixed lifespan
pub struct FactCache {
    cache: Arc<RwLock<TimedCache<PathBuf, Arc<FactSheet>>>>,
}

impl FactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(TimedCache::with_lifespan(ttl))),
        }
    }

    /// Return the cached sheet for `path`, loading it on a miss.
    pub async fn load(&self, path: &Path) -> Result<Arc<FactSheet>> {
        {
            let mut cache = self.cache.write().await;
            if let Some(sheet) = cache.cache_get(&path.to_path_buf()) {
                debug!(path = %path.display(), "fact sheet cache hit");
                return Ok(Arc::clone(sheet));
            }
        }

        debug!(path = %path.display(), "fact sheet cache miss");
        let sheet = Arc::new(FactSheet::load(path).await?);
        let mut cache = self.cache.write().await;
        let _ = cache.cache_set(path.to_path_buf(), Arc::clone(&sheet));
        Ok(sheet)
    }

    /// Drop the cached sheet for `path` so the next load reads the file again.
    pub async fn invalidate(&self, path: &Path) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_remove(&path.to_path_buf());
    }
}

impl Default for FactCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
