//! Action policy
//!
//! Static table of what each VM action requires: which HTTP verbs it accepts
//! and which group roles may invoke it. Roles are bound to concrete directory
//! group ids at startup through [`GroupBindings`].
//!
//! | Action   | Methods     | Roles                    |
//! |----------|-------------|--------------------------|
//! | `start`  | POST        | users, administrators    |
//! | `stop`   | POST        | administrators           |
//! | `status` | GET, POST   | users, administrators    |

use std::fmt;
use std::str::FromStr;

use axum::http::Method;
use serde::Serialize;

use crate::auth::GroupIdSet;
use crate::error::{Error, Result};

/// Privileged operation on the managed VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Power the VM on
    Start,
    /// Power the VM off
    Stop,
    /// Read the VM power state
    Status,
}

impl Action {
    /// All actions, in table order
    pub const ALL: [Action; 3] = [Action::Start, Action::Stop, Action::Status];

    /// Path segment naming the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Status => "status",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| s.eq_ignore_ascii_case(a.as_str()))
            .ok_or_else(|| Error::NotFound(s.to_string()))
    }
}

/// Group role a policy entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    /// Regular VM users
    Users,
    /// VM administrators
    Administrators,
}

/// Requirements for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionPolicyEntry {
    /// Action this entry governs
    pub action: Action,
    /// Accepted HTTP methods
    pub allowed_methods: &'static [&'static str],
    /// Membership in any of these roles is sufficient
    pub required_roles: &'static [GroupRole],
}

impl ActionPolicyEntry {
    /// Whether `method` may invoke this action
    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods.contains(&method.as_str())
    }
}

static POLICY_TABLE: [ActionPolicyEntry; 3] = [
    ActionPolicyEntry {
        action: Action::Start,
        allowed_methods: &["POST"],
        required_roles: &[GroupRole::Users, GroupRole::Administrators],
    },
    ActionPolicyEntry {
        action: Action::Stop,
        allowed_methods: &["POST"],
        required_roles: &[GroupRole::Administrators],
    },
    ActionPolicyEntry {
        action: Action::Status,
        allowed_methods: &["GET", "POST"],
        required_roles: &[GroupRole::Users, GroupRole::Administrators],
    },
];

/// Directory group ids backing each role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBindings {
    /// Object id of the users group
    pub users: String,
    /// Object id of the administrators group
    pub administrators: String,
}

impl GroupBindings {
    fn group_for(&self, role: GroupRole) -> &str {
        match role {
            GroupRole::Users => &self.users,
            GroupRole::Administrators => &self.administrators,
        }
    }
}

/// Policy table bound to concrete group ids
#[derive(Debug, Clone)]
pub struct ActionPolicy {
    bindings: GroupBindings,
}

impl ActionPolicy {
    /// Bind the static table to directory groups
    pub fn new(bindings: GroupBindings) -> Self {
        Self { bindings }
    }

    /// Table entry for an action
    pub fn entry(&self, action: Action) -> &'static ActionPolicyEntry {
        let idx = match action {
            Action::Start => 0,
            Action::Stop => 1,
            Action::Status => 2,
        };
        &POLICY_TABLE[idx]
    }

    /// Resolve the action name and validate the method, before any authorization
    ///
    /// Unknown names fail with `NotFound`, disallowed verbs with `MethodNotAllowed`.
    pub fn check(&self, action_name: &str, method: &Method) -> Result<Action> {
        let action: Action = action_name.parse()?;
        let entry = self.entry(action);
        if !entry.allows_method(method) {
            return Err(Error::MethodNotAllowed {
                action: action.to_string(),
                method: method.to_string(),
                allowed: entry.allowed_methods.join(", "),
            });
        }
        Ok(action)
    }

    /// Group ids that grant the action
    pub fn allowed_groups(&self, action: Action) -> GroupIdSet {
        self.entry(action)
            .required_roles
            .iter()
            .map(|role| self.bindings.group_for(*role).to_string())
            .collect()
    }
}
