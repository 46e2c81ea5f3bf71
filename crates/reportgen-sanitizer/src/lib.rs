//! Fact-checking sanitizer for reportgen
//!
//! Generated text is scanned for claims about fields of a canonical fact
//! sheet ("close was $101.50", "RSI of 61.2", "trend is bullish"). Every claim
//! that disagrees with the sheet is corrected in place and recorded as an
//! audit note. Too many corrections flag the result for human review.
//!
//! The pass is pure: the same response and facts always give the same text,
//! notes and outcome.

pub mod error;
pub mod extract;
pub mod facts;
pub mod sanitizer;

pub use error::{Result, SanitizerError};
pub use extract::Claim;
pub use facts::{Fact, FactCache, FactKind, FactSheet, FactValue};
pub use sanitizer::{
    CorrectionStyle, SanitizationOutcome, SanitizationReport, Sanitizer, SanitizerConfig,
};
