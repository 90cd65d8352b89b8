//! Settlement watcher: a detached task per issued challenge.
//!
//! Not on the admission path. Admission happens when the client returns
//! with a valid preimage; this task only observes the invoice settling so
//! the operator's `on_payment` hook can run side effects. The payer may
//! never come back and the hook still fires.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tokio::task::JoinHandle;

use l402_core::types::PaymentHash;

use crate::config::{PaymentCallback, PaymentEvent};
use crate::wallet::Wallet;

pub struct WatchParams {
    pub payment_hash: PaymentHash,
    pub amount_sats: u64,
    pub endpoint: String,
    pub client_id: String,
    /// Equal to the invoice expiry; there is nothing to observe after that.
    pub timeout: Duration,
}

/// Watch one invoice until settlement or timeout. Wallet errors and
/// timeouts are discarded; a panicking callback is caught so it cannot
/// take the server down.
pub fn spawn<W>(wallet: W, callback: PaymentCallback, params: WatchParams) -> JoinHandle<()>
where
    W: Wallet + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let status = match wallet
            .wait_for_payment(params.payment_hash, params.timeout)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                tracing::debug!(payment_hash = %params.payment_hash, %err, "settlement watch failed");
                return;
            }
        };

        if !status.paid {
            tracing::debug!(payment_hash = %params.payment_hash, "invoice lapsed unpaid");
            return;
        }
        let Some(preimage) = status.preimage else {
            tracing::debug!(payment_hash = %params.payment_hash, "settled without preimage");
            return;
        };

        let event = PaymentEvent {
            payment_hash: params.payment_hash,
            amount_sats: params.amount_sats,
            endpoint: params.endpoint,
            preimage,
            settled_at: status.settled_at.unwrap_or_default(),
            client_id: params.client_id,
        };

        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::warn!(payment_hash = %params.payment_hash, "payment callback panicked");
        }
    })
}
