//! Generation provider abstraction for reportgen
//!
//! A provider is anything that turns a prompt into text within a time
//! limit. The gateway in `reportgen-pipeline` holds an ordered list of them
//! and fails over between them; this crate only defines the capability and
//! the concrete backends:
//!
//! - [`providers::CommandProvider`]: a local process (always available)
//! - `providers::AnthropicProvider` (feature `anthropic`)
//! - `providers::OpenAIProvider` for any OpenAI-compatible endpoint (feature `openai`)

pub mod error;
pub mod generation;
pub mod provider;
pub mod providers;

pub use error::{ProviderError, Result};
pub use generation::{Generation, TokenUsage};
pub use provider::{GenerationProvider, generate_bounded};
