//! Tiered classifier: rules first, fallback on `Unknown`.

use async_trait::async_trait;

use sf_protocol::{Command, CommandKind};

use super::IntentClassifier;

pub struct TieredClassifier {
    primary: Box<dyn IntentClassifier>,
    fallback: Box<dyn IntentClassifier>,
}

impl TieredClassifier {
    pub fn new(primary: Box<dyn IntentClassifier>, fallback: Box<dyn IntentClassifier>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl IntentClassifier for TieredClassifier {
    async fn classify(&self, text: &str) -> Command {
        let cmd = self.primary.classify(text).await;
        if cmd.kind != CommandKind::Unknown {
            return cmd;
        }
        tracing::debug!(
            primary = self.primary.tier_name(),
            fallback = self.fallback.tier_name(),
            "primary classifier missed, falling back"
        );
        self.fallback.classify(text).await
    }

    fn tier_name(&self) -> &str {
        "tiered"
    }
}
