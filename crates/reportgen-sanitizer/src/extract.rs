//! Claim extraction
//!
//! A claim is an alias of a fact followed by a value of the fact's kind:
//! `<alias> <up to 40 non-digit chars> <value>` for numbers and dates, and
//! `<alias> is|was|:|= <words>` for labels. Matching is case-insensitive.
//!
//! A parenthesised qualifier right after the alias (`RSI(14)`, `SMA (50)`)
//! names a variant of the field, not its value, and is skipped. Filler words
//! before a label (`is a bullish one`, `is still bullish`) are skipped too.

use std::ops::Range;

use regex::{Captures, Match, Regex};

use crate::facts::{Fact, FactKind, FactSheet, FactValue};
use crate::Result;

const NUM: &str = r"[-+]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?";
const MAX_GAP: usize = 40;
const WORD: &str = r"[A-Za-z][A-Za-z-]*";
/// Longest qualifier body, in bytes
const MAX_QUALIFIER: usize = 20;
/// Filler words skipped before a label value
const LEAD_WORDS: &[&str] = &[
    "a", "an", "the", "very", "still", "now", "currently", "clearly", "firmly", "strongly",
    "broadly", "largely", "mostly", "quite", "fairly", "rather", "somewhat", "mildly",
    "moderately", "slightly",
];
const MAX_LEAD_WORDS: usize = 3;

/// Regex for an alias, with word boundaries where the alias edge is a word character.
fn alias_pattern(alias: &str) -> String {
    let escaped = regex::escape(alias).replace(' ', r"\s+");
    let word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if word(alias.chars().next()) { r"\b" } else { "" };
    let end = if word(alias.chars().last()) { r"\b" } else { "" };
    format!("{start}{escaped}{end}")
}

/// Compiled patterns locating the claims about one fact
#[derive(Debug, Clone)]
pub(crate) struct ClaimMatcher {
    /// Alias, and for labels the connector after it
    lead: Regex,
    /// Value tokens for numbers and dates, single words for labels
    value: Regex,
}

impl ClaimMatcher {
    pub(crate) fn new(kind: FactKind, aliases: &[String]) -> Result<Self> {
        let alternatives = aliases
            .iter()
            .map(|alias| alias_pattern(alias))
            .collect::<Vec<_>>()
            .join("|");

        let (lead, value) = match kind {
            FactKind::Label => (
                format!(r"(?i)(?P<alias>{alternatives})\s*(?:(?:is|was|remains|stays)\s+|[:=]\s*)"),
                WORD.to_string(),
            ),
            _ => (
                format!(r"(?i)(?P<alias>{alternatives})"),
                format!(r"(?P<date>\d{{4}}-\d{{2}}-\d{{2}})|(?P<prefix>\$\s?)?(?P<num>{NUM})(?P<suffix>\s?%)?"),
            ),
        };
        Ok(Self {
            lead: Regex::new(&lead)?,
            value: Regex::new(&value)?,
        })
    }
}

/// A statement in generated text about one fact
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    /// Index of the fact in its sheet
    pub fact_index: usize,
    /// Byte span of the whole claim, alias included
    pub span: Range<usize>,
    pub alias_len: usize,
    /// Byte span of the value, decoration (`$`, `%`) included
    pub value_span: Range<usize>,
    /// Value text as written
    pub original: String,
    /// Parsed number for numeric kinds
    pub number: Option<f64>,
    /// Bare value text (number without decoration, date or label)
    pub text: String,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

/// Whether the number is really part of a date, a range or a unit-suffixed token.
fn continues_token(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_alphanumeric() || c == '_' => true,
        Some('-' | '/') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Byte length of a parenthesised qualifier at the start of `rest`, and
/// whether it is attached to the alias (`RSI(14)` rather than `SMA (50)`).
fn qualifier(rest: &str) -> Option<(usize, bool)> {
    let trimmed = rest.trim_start_matches([' ', '\t']);
    let lead = rest.len() - trimmed.len();
    let inner = trimmed.strip_prefix('(')?;
    let close = inner.find(')')?;
    if close > MAX_QUALIFIER || inner[..close].contains(['(', '\n']) {
        return None;
    }
    Some((lead + close + 2, lead == 0))
}

struct Located<'t> {
    fact_index: usize,
    fact: &'t Fact,
    alias: Match<'t>,
    /// Text up to the end of the alias's line
    line: &'t str,
}

impl<'t> Located<'t> {
    fn claim(&self, value: Range<usize>, text: String, number: Option<f64>) -> Claim {
        Claim {
            fact_index: self.fact_index,
            span: self.alias.start()..value.end,
            alias_len: self.alias.len(),
            original: self.line[value.clone()].to_string(),
            value_span: value,
            number,
            text,
            prefix: None,
            suffix: None,
        }
    }

    fn numeric_or_date(&self) -> Option<Claim> {
        let after_alias = self.alias.end();
        if let Some((len, attached)) = qualifier(&self.line[after_alias..]) {
            let found = self.value_from(after_alias + len);
            if found.is_some() || attached {
                return found;
            }
        }
        self.value_from(after_alias)
    }

    /// First value token at or after `from`, if it suits the fact's kind.
    fn value_from(&self, from: usize) -> Option<Claim> {
        let caps = self.fact.matcher.value.captures_at(self.line, from)?;
        let token = caps.get(0)?;
        if self.line[from..token.start()].chars().count() > MAX_GAP {
            return None;
        }

        if let Some(date) = caps.name("date") {
            return (self.fact.kind == FactKind::Date)
                .then(|| self.claim(date.range(), date.as_str().to_string(), None));
        }
        if self.fact.kind == FactKind::Date {
            return None;
        }
        self.number(&caps)
    }

    fn number(&self, caps: &Captures<'t>) -> Option<Claim> {
        let num = caps.name("num")?;
        let suffix = caps.name("suffix");
        if suffix.is_some() != (self.fact.kind == FactKind::Percent) {
            return None;
        }
        if suffix.is_none() && continues_token(&self.line[num.end()..]) {
            return None;
        }
        let number = num.as_str().replace(',', "").parse::<f64>().ok()?;
        let prefix = caps
            .name("prefix")
            .filter(|_| self.fact.kind == FactKind::Price);

        let start = prefix.map_or(num.start(), |p| p.start());
        let end = suffix.map_or(num.end(), |s| s.end());
        let mut claim = self.claim(start..end, num.as_str().to_string(), Some(number));
        claim.prefix = prefix.map(|p| p.as_str().to_string());
        claim.suffix = suffix.map(|s| s.as_str().to_string());
        Some(claim)
    }

    /// Words of a label claim, starting where the connector ends.
    fn label(&self, from: usize) -> Option<Claim> {
        let FactValue::Text(canonical) = &self.fact.value else {
            return None;
        };
        let wanted: Vec<&str> = canonical.split_whitespace().collect();
        let size = wanted.len().max(1);
        let words = words_from(&self.fact.matcher.value, self.line, from, MAX_LEAD_WORDS + size);

        let filler = words
            .iter()
            .take(MAX_LEAD_WORDS)
            .take_while(|w| LEAD_WORDS.contains(&w.as_str().to_ascii_lowercase().as_str()))
            .count();
        // A canonical label may itself open with a filler word ("very bullish").
        let start = (0..=filler)
            .find(|&s| {
                words.len() >= s + size
                    && words[s..s + size]
                        .iter()
                        .zip(&wanted)
                        .all(|(w, c)| w.as_str().eq_ignore_ascii_case(c))
            })
            .unwrap_or(filler)
            .min(words.len().checked_sub(size)?);

        let value = words[start].start()..words[start + size - 1].end();
        let text = self.line[value.clone()].to_string();
        Some(self.claim(value, text, None))
    }
}

/// Up to `limit` words separated by spaces only, the first starting at `from`.
fn words_from<'t>(word: &Regex, line: &'t str, from: usize, limit: usize) -> Vec<Match<'t>> {
    let mut words = Vec::new();
    let mut pos = from;
    while words.len() < limit {
        let Some(found) = word.find_at(line, pos).filter(|m| m.start() == pos) else {
            break;
        };
        words.push(found);
        let rest = &line[found.end()..];
        let spaces = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        if spaces == 0 {
            break;
        }
        pos = found.end() + spaces;
    }
    words
}

fn claims_for<'t>(fact_index: usize, fact: &'t Fact, text: &'t str) -> Vec<Claim> {
    fact.matcher
        .lead
        .captures_iter(text)
        .filter_map(|caps| {
            let alias = caps.name("alias")?;
            let lead_end = caps.get(0)?.end();
            let line_end = text[alias.end()..]
                .find('\n')
                .map_or(text.len(), |i| alias.end() + i);
            let located = Located {
                fact_index,
                fact,
                alias,
                line: &text[..line_end],
            };
            match fact.kind {
                FactKind::Label => located.label(lead_end),
                _ => located.numeric_or_date(),
            }
        })
        .collect()
}

/// All claims in `text`, ordered by position, without overlaps.
///
/// Where claims overlap, the one starting first wins; at the same start the
/// longer alias wins.
pub fn extract_claims(text: &str, sheet: &FactSheet) -> Vec<Claim> {
    let mut claims: Vec<Claim> = sheet
        .iter()
        .enumerate()
        .flat_map(|(index, fact)| claims_for(index, fact, text))
        .collect();

    claims.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then_with(|| b.alias_len.cmp(&a.alias_len))
            .then_with(|| a.fact_index.cmp(&b.fact_index))
    });

    let mut cursor = 0;
    claims.retain(|claim| {
        if claim.span.start >= cursor {
            cursor = claim.span.end;
            true
        } else {
            false
        }
    });
    claims
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> FactSheet {
        FactSheet::from_json_str(
            r#"{"facts": {
                "close_price": {"value": 101.2, "kind": "price", "aliases": ["close"]},
                "change_pct": {"value": 2.5, "kind": "percent", "aliases": ["change"]},
                "rsi": {"value": 61.2, "kind": "number", "aliases": ["RSI(14)"]},
                "as_of": {"value": "2026-10-16", "kind": "date", "aliases": ["as of"]},
                "trend": {"value": "bullish", "kind": "label"}
            }}"#,
        )
        .unwrap()
    }

    fn fields(text: &str) -> Vec<(String, String)> {
        let sheet = sheet();
        let facts: Vec<_> = sheet.iter().collect();
        extract_claims(text, &sheet)
            .into_iter()
            .map(|c| (facts[c.fact_index].field.clone(), c.original))
            .collect()
    }

    #[test]
    fn test_extracts_each_kind() {
        let text = "As of 2026-10-16 the close was $101.20, a change of +2.5% on the day. \
                    RSI(14) sits at 61.2 and the trend is bullish.";
        assert_eq!(
            fields(text),
            vec![
                ("as_of".to_string(), "2026-10-16".to_string()),
                ("close_price".to_string(), "$101.20".to_string()),
                ("change_pct".to_string(), "+2.5%".to_string()),
                ("rsi".to_string(), "61.2".to_string()),
                ("trend".to_string(), "bullish".to_string()),
            ]
        );
    }

    #[test]
    fn test_gap_is_bounded() {
        let far = format!("close {} 101.20", "x".repeat(41));
        assert!(fields(&far).is_empty());
        let near = format!("close {} 101.20", "x".repeat(30));
        assert_eq!(fields(&near).len(), 1);
    }

    #[test]
    fn test_percent_is_not_a_price() {
        assert!(fields("close moved 5% higher").is_empty());
    }

    #[test]
    fn test_numbers_inside_dates_are_ignored() {
        assert!(fields("RSI(14) on 2026-10-16").is_empty());
    }

    #[test]
    fn test_spaced_qualifier_falls_back_to_value() {
        let sheet = FactSheet::from_json_str(
            r#"{"facts": {
                "sma": {"value": 98.5, "kind": "number", "aliases": ["SMA"]},
                "close_price": {"value": 101.2, "kind": "price", "aliases": ["close"]}
            }}"#,
        )
        .unwrap();
        let claims = extract_claims("SMA (50) at 97.9, close ($101.20)", &sheet);
        let values: Vec<&str> = claims.iter().map(|c| c.original.as_str()).collect();
        assert_eq!(values, ["97.9", "$101.20"]);
    }

    #[test]
    fn test_label_claim_spans_canonical_words() {
        let sheet = FactSheet::from_json_str(
            r#"{"facts": {"outlook": {"value": "very bullish", "kind": "label"}}}"#,
        )
        .unwrap();
        let claims = extract_claims("The outlook is very bullish today.", &sheet);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].original, "very bullish");

        let claims = extract_claims("The outlook is very bearish.", &sheet);
        assert_eq!(claims[0].original, "very bearish");
    }

    #[test]
    fn test_case_insensitive_and_thousands() {
        let sheet = FactSheet::from_json_str(r#"{"volume": 1250000}"#).unwrap();
        let claims = extract_claims("VOLUME reached 1,300,000 shares", &sheet);
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].number, Some(1_300_000.0));
        assert_eq!(claims[0].original, "1,300,000");
    }

    #[test]
    fn test_longest_alias_wins_overlap() {
        let sheet = FactSheet::from_json_str(
            r#"{"facts": {
                "price": {"value": 5.0, "kind": "price"},
                "target_price": {"value": 120.0, "kind": "price"}
            }}"#,
        )
        .unwrap();
        let claims = extract_claims("target price of $130", &sheet);
        assert_eq!(claims.len(), 1);
        let facts: Vec<_> = sheet.iter().collect();
        assert_eq!(facts[claims[0].fact_index].field, "target_price");
    }
}
