//! Sanitizer: correct disagreeing claims and decide the outcome

use std::fmt;
use std::str::FromStr;

use reportgen_core::{AuditNote, NewAuditRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::extract::{Claim, extract_claims};
use crate::facts::{Fact, FactKind, FactSheet, FactValue};

/// Absolute slack added to tolerance checks to absorb float rounding
const EPSILON: f64 = 1e-9;

/// How a wrong value is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionStyle {
    /// Write the canonical value in place of the claimed one
    #[default]
    Substitute,
    /// Keep the claimed value but strike it through (`~~$101.50~~`)
    Strike,
}

impl FromStr for CorrectionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substitute" => Ok(CorrectionStyle::Substitute),
            "strike" => Ok(CorrectionStyle::Strike),
            other => Err(format!("unknown correction style '{other}'")),
        }
    }
}

impl fmt::Display for CorrectionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrectionStyle::Substitute => "substitute",
            CorrectionStyle::Strike => "strike",
        })
    }
}

/// Sanitizer settings
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizerConfig {
    /// Corrections at or above this count flag the result
    pub flag_threshold: u32,
    /// Relative tolerance for numeric comparisons
    pub tolerance: f64,
    pub style: CorrectionStyle,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 2,
            tolerance: 0.005,
            style: CorrectionStyle::Substitute,
        }
    }
}

/// Terminal decision for a sanitized response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizationOutcome {
    Complete,
    /// Too many corrections: needs a human before it may be published
    Flag,
}

/// Result of one sanitizer pass
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizationReport {
    /// Response with corrections applied
    pub text: String,
    /// One note per correction, in order of position
    pub notes: Vec<AuditNote>,
    pub outcome: SanitizationOutcome,
}

impl SanitizationReport {
    pub fn corrections_count(&self) -> u32 {
        self.notes.len() as u32
    }

    pub fn is_flagged(&self) -> bool {
        self.outcome == SanitizationOutcome::Flag
    }

    /// Audit record for an automatic pass.
    pub fn audit_record(&self) -> NewAuditRecord {
        NewAuditRecord::sanitization(self.notes.clone())
    }

    /// Audit record for a pass over a reviewer's edit.
    pub fn revision_record(&self) -> NewAuditRecord {
        NewAuditRecord::revision(self.notes.clone())
    }
}

/// Reconciles generated text with canonical facts
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SanitizerConfig {
        &self.config
    }

    /// Check every claim in `response` against `facts`.
    #[instrument(skip_all, fields(facts = facts.len(), chars = response.len()))]
    pub fn sanitize(&self, response: &str, facts: &FactSheet) -> SanitizationReport {
        let sheet: Vec<&Fact> = facts.iter().collect();
        let mut text = String::with_capacity(response.len());
        let mut notes = Vec::new();
        let mut cursor = 0;

        for claim in extract_claims(response, facts) {
            let fact = sheet[claim.fact_index];
            if self.agrees(&claim, fact) {
                continue;
            }
            let corrected = canonical_text(&claim, fact);
            let replacement = match self.config.style {
                CorrectionStyle::Substitute => corrected.clone(),
                CorrectionStyle::Strike => format!("~~{}~~", claim.original),
            };
            text.push_str(&response[cursor..claim.value_span.start]);
            text.push_str(&replacement);
            cursor = claim.value_span.end;
            notes.push(AuditNote::new(fact.field.clone(), claim.original, corrected));
        }
        text.push_str(&response[cursor..]);

        let outcome = if notes.len() as u32 >= self.config.flag_threshold {
            SanitizationOutcome::Flag
        } else {
            SanitizationOutcome::Complete
        };
        debug!(corrections = notes.len(), ?outcome, "sanitizer pass finished");

        SanitizationReport {
            text,
            notes,
            outcome,
        }
    }

    fn agrees(&self, claim: &Claim, fact: &Fact) -> bool {
        match (&fact.value, claim.number) {
            (FactValue::Number(canonical), Some(claimed)) => {
                let allowed = self.config.tolerance * canonical.abs();
                (claimed - canonical).abs() <= allowed + EPSILON
            }
            (FactValue::Text(canonical), _) if fact.kind == FactKind::Label => {
                claim.text.eq_ignore_ascii_case(canonical)
            }
            (FactValue::Text(canonical), _) => claim.text == *canonical,
            (FactValue::Number(_), None) => true,
        }
    }
}

/// Canonical value dressed like the claim (`$` and `%` kept).
fn canonical_text(claim: &Claim, fact: &Fact) -> String {
    format!(
        "{}{}{}",
        claim.prefix.as_deref().unwrap_or(""),
        fact.display,
        claim.suffix.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> FactSheet {
        FactSheet::from_json_str(
            r#"{"facts": {
                "close_price": {"value": 101.2, "kind": "price", "aliases": ["close"]},
                "change_pct": {"value": 2.5, "kind": "percent", "aliases": ["change"]},
                "rsi": {"value": 61.2, "kind": "number", "aliases": ["RSI"]},
                "as_of": {"value": "2026-10-16", "kind": "date", "aliases": ["as of"]},
                "trend": {"value": "bullish", "kind": "label"}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_clean_response_has_zero_corrections() {
        let report = Sanitizer::default().sanitize(
            "The close was $101.20 (change +2.5%), RSI 61.2, trend is Bullish.",
            &facts(),
        );
        assert_eq!(report.corrections_count(), 0);
        assert_eq!(report.outcome, SanitizationOutcome::Complete);
        assert_eq!(report.audit_record().corrections_count, 0);
    }

    #[test]
    fn test_within_tolerance_is_accepted() {
        // 101.5 is within 0.5% of 101.2
        let report = Sanitizer::default().sanitize("close at $101.50", &facts());
        assert_eq!(report.corrections_count(), 0);
    }

    #[test]
    fn test_single_mismatch_completes_with_correction() {
        let report = Sanitizer::default().sanitize(
            "The close was $108.40 and RSI 61.2.",
            &facts(),
        );
        assert_eq!(report.outcome, SanitizationOutcome::Complete);
        assert_eq!(report.text, "The close was $101.20 and RSI 61.2.");
        assert_eq!(
            report.notes,
            vec![AuditNote::new("close_price", "$108.40", "$101.20")]
        );
    }

    #[test]
    fn test_many_mismatches_flag() {
        let report = Sanitizer::default().sanitize(
            "As of 2026-10-15 the close was $95.00, a change of 4.1%, trend is bearish.",
            &facts(),
        );
        assert_eq!(report.outcome, SanitizationOutcome::Flag);
        assert_eq!(report.corrections_count(), 4);
        assert_eq!(
            report.text,
            "As of 2026-10-16 the close was $101.20, a change of 2.5%, trend is bullish."
        );
        let fields: Vec<&str> = report.notes.iter().map(|n| n.field.as_str()).collect();
        assert_eq!(fields, ["as_of", "close_price", "change_pct", "trend"]);
    }

    #[test]
    fn test_strike_style_keeps_original() {
        let sanitizer = Sanitizer::new(SanitizerConfig {
            style: CorrectionStyle::Strike,
            ..SanitizerConfig::default()
        });
        let report = sanitizer.sanitize("RSI reads 70.3 today", &facts());
        assert_eq!(report.text, "RSI reads ~~70.3~~ today");
        assert_eq!(report.notes[0].corrected, "61.2");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let sanitizer = Sanitizer::new(SanitizerConfig {
            flag_threshold: 1,
            ..SanitizerConfig::default()
        });
        let report = sanitizer.sanitize("RSI reads 70.3", &facts());
        assert!(report.is_flagged());
    }

    #[test]
    fn test_sanitizer_is_deterministic() {
        let sanitizer = Sanitizer::default();
        let facts = facts();
        let response = "close $99, change 3.3%, RSI 12, trend: bearish, as of 2026-01-01";
        let first = sanitizer.sanitize(response, &facts);
        for _ in 0..20 {
            assert_eq!(sanitizer.sanitize(response, &facts), first);
        }
    }

    #[test]
    fn test_period_qualifier_is_not_a_value() {
        let report = Sanitizer::default().sanitize("The RSI(14) is 61.2 today.", &facts());
        assert_eq!(report.text, "The RSI(14) is 61.2 today.");
        assert!(report.notes.is_empty());

        let report = Sanitizer::default().sanitize("RSI (14-day) reads 70.3", &facts());
        assert_eq!(report.text, "RSI (14-day) reads 61.2");
        assert_eq!(report.notes, vec![AuditNote::new("rsi", "70.3", "61.2")]);
    }

    #[test]
    fn test_attached_qualifier_without_value_is_no_claim() {
        let report = Sanitizer::default().sanitize("RSI(14) turned higher.", &facts());
        assert_eq!(report.corrections_count(), 0);
        assert_eq!(report.text, "RSI(14) turned higher.");
    }

    #[test]
    fn test_filler_words_before_label_are_skipped() {
        let report = Sanitizer::default().sanitize("The trend is a bullish one.", &facts());
        assert_eq!(report.text, "The trend is a bullish one.");
        assert!(report.notes.is_empty());

        let report = Sanitizer::default().sanitize("The trend is still bearish.", &facts());
        assert_eq!(report.text, "The trend is still bullish.");
        assert_eq!(report.notes, vec![AuditNote::new("trend", "bearish", "bullish")]);
    }

    #[test]
    fn test_accurate_response_with_qualifiers_completes() {
        let report = Sanitizer::default().sanitize(
            "The close was $101.20, the RSI(14) is 61.2 and the trend is a bullish one.",
            &facts(),
        );
        assert_eq!(report.outcome, SanitizationOutcome::Complete);
        assert_eq!(report.corrections_count(), 0);
    }

    #[test]
    fn test_sub_cent_price_is_substituted_in_full() {
        let facts = FactSheet::from_json_str(
            r#"{"facts": {"token_price": {"value": 0.00042, "kind": "price", "aliases": ["token"]}}}"#,
        )
        .unwrap();
        let report = Sanitizer::default().sanitize("The token traded at $0.00051.", &facts);
        assert_eq!(report.text, "The token traded at $0.00042.");
    }

    #[test]
    fn test_style_parsing() {
        assert_eq!("Strike".parse::<CorrectionStyle>(), Ok(CorrectionStyle::Strike));
        assert!("erase".parse::<CorrectionStyle>().is_err());
    }
}
