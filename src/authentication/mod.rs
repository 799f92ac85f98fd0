//! Authentication pipeline
//!
//! Processes a callback received on the redirection endpoint. Phases run in
//! order and share one [`ProcessAuthenticationContext`]:
//!
//! - [`state`] (1000-10000): callback errors, state token, registration,
//!   configuration, `iss` parameter, forgery protection
//! - [`frontchannel`] (11000-15000): tokens returned on the callback
//! - [`backchannel`] (16000-23000): authorization code exchange
//! - [`userinfo`] (24000-28000): userinfo request
//! - 29000: principal assembly
//!
//! A rejection in any phase stops the pipeline; no principal is assembled.

use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::{Handler, HandlerDescriptor, PipelineContext, ProcessAuthenticationContext, TokenSlot};
use crate::principal::Principal;
use crate::protocol::TokenKind;
use crate::service::Services;
use crate::tokens::{TokenDispatcher, TokenValidationRequest};

pub mod backchannel;
pub mod frontchannel;
pub mod identity;
pub mod state;
pub mod userinfo;

/// Builds the built-in authentication handlers.
pub fn handlers(services: &Services) -> Vec<HandlerDescriptor<ProcessAuthenticationContext>> {
    let mut handlers = Vec::new();
    handlers.extend(state::handlers(services));
    handlers.extend(frontchannel::handlers(services));
    handlers.extend(backchannel::handlers(services));
    handlers.extend(userinfo::handlers(services));
    handlers.push(HandlerDescriptor::from_fn(
        "assemble_principal",
        29_000,
        assemble_principal,
    ));
    handlers
}

/// Selects one token slot of the context.
pub(crate) type SlotAccessor = fn(&mut ProcessAuthenticationContext) -> &mut TokenSlot;

/// Validates the token held by one slot through the token dispatcher and
/// stores the resulting principal in that slot.
pub(crate) struct ValidateSlotToken {
    pub(crate) tokens: Arc<dyn TokenDispatcher>,
    pub(crate) kinds: &'static [TokenKind],
    pub(crate) slot: SlotAccessor,
}

#[async_trait::async_trait]
impl Handler<ProcessAuthenticationContext> for ValidateSlotToken {
    async fn handle(&self, context: &mut ProcessAuthenticationContext) -> Result<()> {
        let Some(token) = (self.slot)(context).token.clone() else {
            return Ok(());
        };

        let request = TokenValidationRequest {
            token: &token,
            kinds: self.kinds,
            registration: context.registration.as_ref(),
            configuration: context.configuration.as_ref(),
        };
        match self.tokens.validate_token(request).await? {
            Ok(principal) => {
                tracing::debug!(kinds = ?self.kinds, "Validated token");
                (self.slot)(context).accept(principal);
            }
            Err(rejection) => context.reject(rejection),
        }
        Ok(())
    }
}

/// Merges the validated principals, backchannel identity token first, then
/// the frontchannel identity token, then the userinfo claims.
fn assemble_principal(context: &mut ProcessAuthenticationContext) -> Result<()> {
    let sources = [
        context.backchannel_identity_token.principal.as_ref(),
        context.frontchannel_identity_token.principal.as_ref(),
        context.userinfo_token.principal.as_ref(),
        context.userinfo_principal.as_ref(),
    ];

    let mut principal = Principal::new();
    for source in sources.into_iter().flatten() {
        principal.merge_missing(source);
    }

    tracing::debug!(claims = principal.claims().len(), "Assembled principal");
    context.principal = Some(principal);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assemble_principal_prefers_backchannel_claims() {
        let mut context = ProcessAuthenticationContext::default();
        context.backchannel_identity_token.principal =
            Principal::from_value(json!({"sub": "alice", "name": "Alice"}));
        context.frontchannel_identity_token.principal =
            Principal::from_value(json!({"sub": "alice", "name": "A.", "acr": "1"}));
        context.userinfo_principal =
            Principal::from_value(json!({"sub": "alice", "email": "alice@example.com"}));

        assemble_principal(&mut context).unwrap();

        let principal = context.principal.unwrap();
        assert_eq!(principal.claim_str("name"), Some("Alice"));
        assert_eq!(principal.claim_str("acr"), Some("1"));
        assert_eq!(principal.claim_str("email"), Some("alice@example.com"));
    }

    #[test]
    fn test_assemble_principal_without_identity_is_empty() {
        let mut context = ProcessAuthenticationContext::default();
        assemble_principal(&mut context).unwrap();
        assert!(context.principal.unwrap().claims().is_empty());
    }

    #[test]
    fn test_handler_orders_are_unique_and_ascending() {
        let services = crate::test_utils::services();
        let handlers = handlers(&services);
        let orders: Vec<i32> = handlers.iter().map(|h| h.order()).collect();
        let mut sorted = orders.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(orders, sorted);
    }
}
