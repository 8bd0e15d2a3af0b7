//! Action dispatch
//!
//! Flow for every request:
//! 1. Resolve the action name and validate the HTTP method (404 / 405)
//! 2. Extract the principal from the identity header
//! 3. Authorize against the groups the action requires (401 / 403)
//! 4. Invoke the VM operation
//!
//! Steps 1 and 2 never touch the network, so malformed requests are rejected
//! before any directory traffic is generated.

use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::extract_principal;
use crate::compute::VmControl;
use crate::error::Result;
use crate::policy::{Action, ActionPolicy};
use crate::resolver::AuthorizationResolver;

/// Result of a successfully dispatched action
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    /// Always true; failures are reported through `Error`
    pub success: bool,
    /// Action that ran
    pub action: Action,
    /// Payload returned by the VM operation
    pub result: serde_json::Value,
}

/// Routes action requests through policy, authorization and VM control
pub struct Dispatcher {
    policy: ActionPolicy,
    resolver: Arc<AuthorizationResolver>,
    vm: Arc<dyn VmControl>,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        policy: ActionPolicy,
        resolver: Arc<AuthorizationResolver>,
        vm: Arc<dyn VmControl>,
    ) -> Self {
        Self {
            policy,
            resolver,
            vm,
        }
    }

    /// Handle one action request
    pub async fn dispatch(
        &self,
        method: &Method,
        action_name: &str,
        headers: &HeaderMap,
    ) -> Result<ActionOutcome> {
        let action = self.policy.check(action_name, method)?;

        let principal = extract_principal(headers);
        let allowed = self.policy.allowed_groups(action);
        let principal = self.resolver.authorize(principal.as_ref(), &allowed).await?;

        info!(
            user = %principal.user_id(),
            display_name = %principal.display_name(),
            roles = ?principal.roles(),
            action = %action,
            "Authorized VM action"
        );

        let result = self.invoke(action).await?;
        debug!(action = %action, "VM action completed");

        Ok(ActionOutcome {
            success: true,
            action,
            result,
        })
    }

    async fn invoke(&self, action: Action) -> Result<serde_json::Value> {
        match action {
            Action::Start => self.vm.start().await,
            Action::Stop => self.vm.power_off().await,
            Action::Status => self.vm.instance_view().await,
        }
    }
}
