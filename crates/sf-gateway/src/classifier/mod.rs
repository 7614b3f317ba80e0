//! Intent classification: operator text → typed `Command`.
//!
//! Tiers:
//! - **Rules** (local): ordered regex rules with static weights.
//! - **Ollama** (optional): local LLM for text no rule matches.
//!
//! `TieredClassifier` chains them. Classifiers never fail: anything they
//! cannot place becomes `CommandKind::Unknown` with confidence 0.

pub mod ollama;
pub mod rules;
pub mod tiered;

use std::sync::Arc;

use async_trait::async_trait;
use sf_protocol::Command;

/// Trait for classifiers that map free text to a command.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Command;

    /// Name of this tier (recorded as `Command::classified_by`).
    fn tier_name(&self) -> &str;
}

pub use ollama::{OllamaClassifier, OllamaConfig};
pub use rules::RuleClassifier;
pub use tiered::TieredClassifier;

/// Rules alone, or rules with Ollama fallback when it is enabled.
pub fn from_config(ollama: &OllamaConfig) -> Arc<dyn IntentClassifier> {
    if !ollama.enabled {
        return Arc::new(RuleClassifier::new());
    }
    match OllamaClassifier::new(ollama.clone()) {
        Ok(fallback) => {
            tracing::info!(host = %ollama.host, model = %ollama.model, "ollama fallback enabled");
            Arc::new(TieredClassifier::new(
                Box::new(RuleClassifier::new()),
                Box::new(fallback),
            ))
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to build ollama client, using rules only");
            Arc::new(RuleClassifier::new())
        }
    }
}
