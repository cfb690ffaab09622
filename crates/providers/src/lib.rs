//! Model provider implementations for redscope.
//!
//! All providers implement the `redscope_core::ModelProvider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use redscope_config::AppConfig;

/// Build the model provider from the resolved configuration.
pub fn build_from_config(config: &AppConfig) -> Result<OpenAiCompatProvider, redscope_core::error::ProviderError> {
    OpenAiCompatProvider::new(
        "openai",
        &config.base_url,
        &config.api_key,
        config.runtime.timing.session_timeout(),
    )
}
