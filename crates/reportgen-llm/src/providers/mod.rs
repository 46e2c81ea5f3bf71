//! Concrete generation backends
//!
//! HTTP backends are feature-gated; the local command backend is always built.

pub mod command;

#[cfg(any(feature = "anthropic", feature = "openai"))]
mod limiter;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "openai")]
pub mod openai;

pub use command::CommandProvider;

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicConfig, AnthropicProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAIConfig, OpenAIProvider};
