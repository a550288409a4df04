//! Canned gateway for debug runs.
//!
//! Returns a fixed local reply instead of spending API quota, and echoes
//! a farewell when the user says one so the whole teardown path can be
//! exercised offline.

use async_trait::async_trait;
use kotoba_core::gateway::{
    Completion, CompletionGateway, CompletionRequest, GatewayError, TokenUsage,
};
use kotoba_core::message::Role;

/// Fixed reply for every ordinary debug turn.
pub const CANNED_REPLY: &str = "這是一個測試回應。為了避免過度使用 API，這個回應是從本地讀取的。";

/// A gateway that never calls out.
pub struct CannedGateway {
    farewells: Vec<String>,
}

impl CannedGateway {
    /// Echo any of `farewells` back when the user's last message is
    /// exactly that phrase.
    pub fn new(farewells: Vec<String>) -> Self {
        Self { farewells }
    }
}

impl Default for CannedGateway {
    fn default() -> Self {
        Self::new(vec!["掰掰".to_string()])
    }
}

#[async_trait]
impl CompletionGateway for CannedGateway {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.trim());

        let text = match last_user {
            Some(content) if self.farewells.iter().any(|f| f == content) => content.to_string(),
            _ => CANNED_REPLY.to_string(),
        };

        Ok(Completion {
            text,
            usage: TokenUsage::default(),
        })
    }
}
