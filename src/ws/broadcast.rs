//! Broadcaster: the only place that touches the transport on the way out.
//!
//! Delivery is fire-and-forget from the core's perspective: a recipient
//! whose channel has closed is skipped, and failures never propagate back
//! into registry state.

use axum::extract::ws::Message;

use crate::broker::Outbound;

/// Serialize the envelope once and push the text frame to each recipient.
pub fn deliver(outbound: &Outbound) {
    let Ok(text) = serde_json::to_string(&outbound.envelope) else {
        return;
    };
    for sender in &outbound.recipients {
        if sender.send(Message::Text(text.clone().into())).is_err() {
            // Recipient's writer task is gone — its own disconnect
            // handling cleans up the registry.
            tracing::debug!("Dropped broadcast to closed connection");
        }
    }
}

pub fn deliver_all(outbounds: &[Outbound]) {
    for outbound in outbounds {
        deliver(outbound);
    }
}
