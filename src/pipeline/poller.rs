//! Transaction submission and confirmation
//!
//! A transaction is broadcast exactly once. Afterwards its status is polled
//! once per round interval until it is included, definitely rejected, or
//! the round budget runs out. A timeout means the outcome is unknown; the
//! poller never resubmits.

use crate::error::PipelineError;
use crate::ledger::{GatewayError, LedgerGateway, PendingStatus};
use crate::transaction::SignedTransaction;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionReceipt {
    Created {
        tx_id: String,
        application_id: u64,
        confirmed_round: u64,
    },
    Called {
        tx_id: String,
        confirmed_round: u64,
    },
}

impl TransactionReceipt {
    pub fn tx_id(&self) -> &str {
        match self {
            TransactionReceipt::Created { tx_id, .. } | TransactionReceipt::Called { tx_id, .. } => {
                tx_id
            }
        }
    }

    pub fn confirmed_round(&self) -> u64 {
        match self {
            TransactionReceipt::Created {
                confirmed_round, ..
            }
            | TransactionReceipt::Called {
                confirmed_round, ..
            } => *confirmed_round,
        }
    }
}

/// Run one gateway call under a deadline, giving up early on cancellation
pub(crate) async fn bounded<T, F>(
    what: &str,
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = tokio::time::timeout(limit, call) => match result {
            Ok(result) => result.map_err(PipelineError::from),
            Err(_) => {
                warn!("{} did not finish within {:?}", what, limit);
                Err(PipelineError::Network(format!(
                    "{} timed out after {}ms",
                    what,
                    limit.as_millis()
                )))
            }
        },
    }
}

/// Submits signed transactions and waits for their inclusion
#[derive(Clone)]
pub struct ConfirmationPoller {
    gateway: Arc<dyn LedgerGateway>,
    round_interval: Duration,
    request_timeout: Duration,
}

impl ConfirmationPoller {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        round_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            round_interval,
            request_timeout,
        }
    }

    /// Broadcast `signed` once and poll for up to `max_rounds` rounds
    pub async fn submit_and_confirm(
        &self,
        signed: &SignedTransaction,
        max_rounds: u32,
        cancel: &CancellationToken,
    ) -> Result<TransactionReceipt, PipelineError> {
        if max_rounds == 0 {
            return Err(PipelineError::InvalidInput(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let tx_id = bounded(
            "broadcast",
            self.request_timeout,
            cancel,
            self.gateway.broadcast(signed),
        )
        .await?;
        info!("Submitted transaction {}", tx_id);

        let mut ticker = tokio::time::interval(self.round_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for round in 1..=max_rounds {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Stopped waiting for {} after {} polls: cancelled", tx_id, round - 1);
                    return Err(PipelineError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            let status = bounded(
                "status poll",
                self.request_timeout,
                cancel,
                self.gateway.pending_transaction_info(&tx_id),
            )
            .await?;
            debug!("Poll {}/{} for {}: {:?}", round, max_rounds, tx_id, status);

            match status {
                PendingStatus::Pending => continue,
                PendingStatus::Rejected(reason) => {
                    warn!("Transaction {} rejected: {}", tx_id, reason);
                    return Err(PipelineError::TransactionRejected(reason));
                }
                PendingStatus::Confirmed {
                    round: confirmed_round,
                    application_id,
                } => {
                    info!("Transaction {} confirmed in round {}", tx_id, confirmed_round);
                    return self.receipt(signed, tx_id, confirmed_round, application_id);
                }
            }
        }

        warn!(
            "Transaction {} not confirmed after {} rounds; outcome unknown",
            tx_id, max_rounds
        );
        Err(PipelineError::ConfirmationTimeout {
            tx_id,
            rounds: max_rounds,
        })
    }

    fn receipt(
        &self,
        signed: &SignedTransaction,
        tx_id: String,
        confirmed_round: u64,
        application_id: Option<u64>,
    ) -> Result<TransactionReceipt, PipelineError> {
        if !signed.transaction.is_create() {
            return Ok(TransactionReceipt::Called {
                tx_id,
                confirmed_round,
            });
        }
        match application_id {
            Some(application_id) => Ok(TransactionReceipt::Created {
                tx_id,
                application_id,
                confirmed_round,
            }),
            None => Err(PipelineError::Network(format!(
                "creation {} confirmed without an application id",
                tx_id
            ))),
        }
    }
}
