//! Response envelope construction. Pure helpers — no side effects, total.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::dispatch::Action;
use crate::ws::ConnectionSender;

/// Wire envelope sent to clients: `{status, action, data, error}`.
/// `data` and `error` serialize as explicit `null` when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: bool,
    pub action: Action,
    pub data: Option<Value>,
    pub error: Option<Value>,
}

/// One envelope paired with its recipient list. Recipients are resolved
/// transport handles so delivery never needs to re-enter the broker lock.
#[derive(Debug)]
pub struct Outbound {
    pub recipients: Vec<ConnectionSender>,
    pub envelope: Envelope,
}

pub fn build_response(
    recipients: Vec<ConnectionSender>,
    action: Action,
    data: Option<Value>,
) -> Outbound {
    Outbound {
        recipients,
        envelope: Envelope {
            status: true,
            action,
            data,
            error: None,
        },
    }
}

/// Thin wrapper fixing `status: false` with an error payload.
pub fn build_error(
    recipients: Vec<ConnectionSender>,
    action: Action,
    error: Value,
) -> Outbound {
    Outbound {
        recipients,
        envelope: Envelope {
            status: false,
            action,
            data: None,
            error: Some(error),
        },
    }
}
