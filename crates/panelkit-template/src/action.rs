//! Action descriptors.
//!
//! Actions are named in the template's `actions` mapping and invoked with no
//! arguments, usually from a node's `on` bindings.

use serde::Serialize;
use serde_json::Value;

/// A reference from one action to another.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionRef {
    /// Refers to a named action.
    Named(String),
    /// An anonymous action written in place.
    Inline(Box<ActionNode>),
}

/// One arm of a conditional branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    /// Condition expression.
    pub when: String,
    /// Action to run when `when` is truthy.
    pub action: ActionRef,
}

/// An action descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionNode {
    /// Assign a value to a state path.
    StateUpdate {
        /// Target state path.
        path: String,
        /// Value to assign; may contain `{{ ... }}` tokens.
        value: Value,
    },
    /// Send a message through the bridge.
    MessageDispatch {
        /// Envelope type.
        message_type: String,
        /// Envelope payload; may contain `{{ ... }}` tokens.
        payload: Value,
    },
    /// Run the first action whose condition holds.
    ConditionalBranch {
        /// Arms in priority order.
        branches: Vec<Branch>,
    },
    /// Ask the host's assistant backend and wait for the reply.
    ExternalRequest {
        /// Prompt text; may contain `{{ ... }}` tokens.
        prompt: String,
        /// Context passed alongside the prompt.
        context: Value,
        /// State path receiving the response.
        store_as: Option<String>,
        /// Steps run after a successful response, with `response` in scope.
        on_success: Vec<ActionRef>,
    },
    /// Run steps strictly in order, stopping at the first failure.
    Sequence {
        /// Steps in execution order.
        steps: Vec<ActionRef>,
    },
}

impl ActionNode {
    /// Short kind name used in logs and events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate { .. } => "state_update",
            Self::MessageDispatch { .. } => "message_dispatch",
            Self::ConditionalBranch { .. } => "conditional_branch",
            Self::ExternalRequest { .. } => "external_request",
            Self::Sequence { .. } => "sequence",
        }
    }

    /// Visit every action reference reachable from this action, including
    /// references nested inside inline actions.
    pub fn visit_refs<'a>(&'a self, visit: &mut impl FnMut(&'a ActionRef)) {
        let refs: Box<dyn Iterator<Item = &'a ActionRef>> = match self {
            Self::StateUpdate { .. } | Self::MessageDispatch { .. } => Box::new(std::iter::empty()),
            Self::ConditionalBranch { branches } => Box::new(branches.iter().map(|b| &b.action)),
            Self::ExternalRequest { on_success, .. } => Box::new(on_success.iter()),
            Self::Sequence { steps } => Box::new(steps.iter()),
        };
        for r in refs {
            visit(r);
            if let ActionRef::Inline(inner) = r {
                inner.visit_refs(visit);
            }
        }
    }
}
