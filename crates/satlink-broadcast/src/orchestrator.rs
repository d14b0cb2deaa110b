//! The broadcast-submission state machine.
//!
//! One driver task per in-flight request. Every transition is persisted
//! before the machine proceeds, and every transition compares against the
//! last committed state so a concurrent operator cancel is never
//! resurrected. Only the orchestrator mutates a record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use satlink_core::{
    BroadcastConfig, BroadcastId, BroadcastRecord, BroadcastState, FailureReason,
};
use satlink_storage::{StorageError, TelemetryStore};

use crate::error::{BroadcastError, Result};
use crate::gateway::{
    BroadcastNetworkGateway, PaymentGateway, PaymentHandle, PaymentStatus, TransmissionStatus,
};

/// Orchestrates paid file broadcasts against the external network.
#[derive(Clone)]
pub struct BroadcastOrchestrator {
    store: Arc<dyn TelemetryStore>,
    network: Arc<dyn BroadcastNetworkGateway>,
    payer: Arc<dyn PaymentGateway>,
    config: BroadcastConfig,
    /// Committed snapshots; readers only ever see persisted state.
    records: Arc<RwLock<HashMap<BroadcastId, BroadcastRecord>>>,
    drivers: Arc<Mutex<HashMap<BroadcastId, JoinHandle<()>>>>,
}

enum TransitionError {
    /// The record is no longer in an expected state (e.g. cancelled).
    Superseded,
    /// Persistence failed; the machine must not run ahead of its record.
    Storage(StorageError),
}

enum DriverPhase {
    /// Fresh request: transition to payment and settle the invoice.
    Pay,
    /// Restart resume: the payment was already initiated, only poll.
    PollPayment,
    /// Restart resume: payment confirmed, only poll transmission.
    PollTransmission,
}

impl BroadcastOrchestrator {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        network: Arc<dyn BroadcastNetworkGateway>,
        payer: Arc<dyn PaymentGateway>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            store,
            network,
            payer,
            config,
            records: Arc::new(RwLock::new(HashMap::new())),
            drivers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit a file for broadcast.
    ///
    /// Rejects a path that already has a non-terminal request with
    /// [`BroadcastError::DuplicateInFlight`]. On success the request is
    /// `Invoiced` and a driver task carries it forward; the returned id is
    /// usable with [`get`](Self::get), [`cancel`](Self::cancel), and
    /// [`wait`](Self::wait).
    pub async fn submit(&self, file_path: &str, bid_msat: u64) -> Result<BroadcastId> {
        let record = BroadcastRecord::new(file_path, bid_msat);
        let id = record.id;
        {
            let mut records = self.records.write().await;
            if records
                .values()
                .any(|r| r.file_path == file_path && !r.state.is_terminal())
            {
                warn!(file = file_path, "submission rejected: already in flight");
                return Err(BroadcastError::DuplicateInFlight(file_path.to_string()));
            }
            self.store.append_broadcast(&record).await?;
            records.insert(id, record);
        }
        info!(id = %id, file = file_path, bid_msat, "broadcast request created");

        // Gateway call with no lock held.
        match self.network.submit(file_path, bid_msat).await {
            Ok(receipt) => {
                let invoiced = self
                    .transition(id, &[BroadcastState::Created], |r| {
                        r.state = BroadcastState::Invoiced;
                        r.invoice = Some(receipt.invoice.clone());
                        r.network_message_id = Some(receipt.network_message_id.clone());
                        r.auth_token = Some(receipt.auth_token.clone());
                    })
                    .await;
                match invoiced {
                    Ok(_) => {}
                    Err(TransitionError::Superseded) => return Err(BroadcastError::Cancelled),
                    Err(TransitionError::Storage(e)) => return Err(e.into()),
                }
            }
            Err(e) => {
                warn!(id = %id, error = %e, "submission rejected by network");
                self.fail(id, &[BroadcastState::Created], FailureReason::SubmissionRejected)
                    .await;
                return Err(BroadcastError::SubmissionRejected(e.to_string()));
            }
        }

        self.spawn_driver(id, DriverPhase::Pay).await;
        Ok(id)
    }

    /// Cancel a request that has not been paid yet.
    ///
    /// Once `Paid`, payment is irreversible and cancellation is refused;
    /// polling continues to a terminal state.
    pub async fn cancel(&self, id: BroadcastId) -> Result<BroadcastRecord> {
        let state = self
            .state_of(id)
            .await
            .ok_or(BroadcastError::UnknownRequest(id))?;
        let cancellable = [
            BroadcastState::Created,
            BroadcastState::Invoiced,
            BroadcastState::PaymentPending,
        ];
        if !cancellable.contains(&state) {
            return Err(BroadcastError::CancelRefused(state));
        }
        match self
            .transition(id, &cancellable, |r| {
                r.state = BroadcastState::Failed;
                r.error = Some(FailureReason::Cancelled);
            })
            .await
        {
            Ok(record) => {
                info!(id = %id, "broadcast cancelled by operator");
                Ok(record)
            }
            Err(TransitionError::Superseded) => {
                let now = self.state_of(id).await.unwrap_or(state);
                Err(BroadcastError::CancelRefused(now))
            }
            Err(TransitionError::Storage(e)) => Err(e.into()),
        }
    }

    /// Resume after a restart.
    ///
    /// Requests left in `PaymentPending` or `Transmitting` re-enter their
    /// polling phase; they are never re-submitted or re-paid. Requests
    /// interrupted before payment (`Created`/`Invoiced`) are marked failed;
    /// resubmission is explicit and carries no double-pay risk.
    pub async fn resume(&self) -> Result<usize> {
        let inflight = self.store.inflight_broadcasts().await?;
        let mut resumed = 0;
        for record in inflight {
            let id = record.id;
            let state = record.state;
            self.records.write().await.insert(id, record);
            match state {
                BroadcastState::PaymentPending => {
                    info!(id = %id, "resuming payment polling");
                    self.spawn_driver(id, DriverPhase::PollPayment).await;
                    resumed += 1;
                }
                BroadcastState::Transmitting => {
                    info!(id = %id, "resuming transmission polling");
                    self.spawn_driver(id, DriverPhase::PollTransmission).await;
                    resumed += 1;
                }
                BroadcastState::Paid => {
                    info!(id = %id, "resuming paid request");
                    if self
                        .transition(id, &[BroadcastState::Paid], |r| {
                            r.state = BroadcastState::Transmitting;
                        })
                        .await
                        .is_ok()
                    {
                        self.spawn_driver(id, DriverPhase::PollTransmission).await;
                        resumed += 1;
                    }
                }
                BroadcastState::Created | BroadcastState::Invoiced => {
                    warn!(id = %id, state = %state, "request predates restart, marking failed");
                    self.fail(
                        id,
                        &[BroadcastState::Created, BroadcastState::Invoiced],
                        FailureReason::Cancelled,
                    )
                    .await;
                }
                BroadcastState::Completed | BroadcastState::Failed => {}
            }
        }
        Ok(resumed)
    }

    /// Committed snapshot of one request.
    pub async fn get(&self, id: BroadcastId) -> Option<BroadcastRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Full persisted history, oldest first.
    pub async fn history(&self) -> Result<Vec<BroadcastRecord>> {
        Ok(self.store.broadcast_history().await?)
    }

    /// Wait for a request's driver to finish and return the final record.
    pub async fn wait(&self, id: BroadcastId) -> Result<BroadcastRecord> {
        let handle = self.drivers.lock().await.remove(&id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.get(id).await.ok_or(BroadcastError::UnknownRequest(id))
    }

    async fn spawn_driver(&self, id: BroadcastId, phase: DriverPhase) {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(id, phase).await });
        self.drivers.lock().await.insert(id, handle);
    }

    async fn drive(&self, id: BroadcastId, phase: DriverPhase) {
        match phase {
            DriverPhase::Pay => self.drive_from_invoiced(id).await,
            DriverPhase::PollPayment => match self.payment_handle(id).await {
                Some(handle) => self.drive_payment(id, handle).await,
                None => {
                    error!(id = %id, "payment_pending record without invoice");
                    self.fail(
                        id,
                        &[BroadcastState::PaymentPending],
                        FailureReason::PaymentFailed,
                    )
                    .await;
                }
            },
            DriverPhase::PollTransmission => self.drive_transmission(id).await,
        }
    }

    async fn drive_from_invoiced(&self, id: BroadcastId) {
        let record = match self
            .transition(id, &[BroadcastState::Invoiced], |r| {
                r.state = BroadcastState::PaymentPending;
            })
            .await
        {
            Ok(record) => record,
            Err(_) => return,
        };
        let Some(invoice) = record.invoice else {
            error!(id = %id, "invoiced record without invoice");
            self.fail(
                id,
                &[BroadcastState::PaymentPending],
                FailureReason::PaymentFailed,
            )
            .await;
            return;
        };

        match self.payer.pay(&invoice).await {
            Ok(handle) => self.drive_payment(id, handle).await,
            Err(e) => {
                warn!(id = %id, error = %e, "payment initiation failed");
                self.fail(
                    id,
                    &[BroadcastState::PaymentPending],
                    FailureReason::PaymentFailed,
                )
                .await;
            }
        }
    }

    async fn drive_payment(&self, id: BroadcastId, handle: PaymentHandle) {
        let deadline = Instant::now() + self.config.payment_timeout();
        loop {
            // Stop quietly if the operator cancelled meanwhile.
            if self.state_of(id).await != Some(BroadcastState::PaymentPending) {
                return;
            }
            match self.payer.poll(&handle).await {
                Ok(PaymentStatus::Paid) => break,
                Ok(PaymentStatus::Failed) => {
                    warn!(id = %id, "payment failed");
                    self.fail(
                        id,
                        &[BroadcastState::PaymentPending],
                        FailureReason::PaymentFailed,
                    )
                    .await;
                    return;
                }
                Ok(PaymentStatus::Pending) => {}
                Err(e) => warn!(id = %id, error = %e, "payment status poll failed"),
            }
            if Instant::now() >= deadline {
                warn!(id = %id, "payment confirmation timed out");
                self.fail(
                    id,
                    &[BroadcastState::PaymentPending],
                    FailureReason::PaymentFailed,
                )
                .await;
                return;
            }
            tokio::time::sleep(self.config.payment_poll_interval()).await;
        }

        if self
            .transition(id, &[BroadcastState::PaymentPending], |r| {
                r.state = BroadcastState::Paid;
            })
            .await
            .is_err()
        {
            return;
        }
        // Payment confirmed; no further network call is needed to start,
        // the order transmits once paid. Begin watching it.
        if self
            .transition(id, &[BroadcastState::Paid], |r| {
                r.state = BroadcastState::Transmitting;
            })
            .await
            .is_err()
        {
            return;
        }
        self.drive_transmission(id).await;
    }

    async fn drive_transmission(&self, id: BroadcastId) {
        let (message_id, auth_token) = {
            let records = self.records.read().await;
            let Some(record) = records.get(&id) else {
                return;
            };
            match record.network_message_id.clone() {
                Some(message_id) => (message_id, record.auth_token.clone()),
                None => {
                    drop(records);
                    error!(id = %id, "transmitting record without network message id");
                    self.fail(
                        id,
                        &[BroadcastState::Transmitting],
                        FailureReason::TransmissionFailed,
                    )
                    .await;
                    return;
                }
            }
        };

        let deadline = Instant::now() + self.config.status_timeout();
        loop {
            if self.state_of(id).await != Some(BroadcastState::Transmitting) {
                return;
            }
            match self
                .network
                .poll_status(&message_id, auth_token.as_deref())
                .await
            {
                Ok(TransmissionStatus::Completed) => {
                    if self
                        .transition(id, &[BroadcastState::Transmitting], |r| {
                            r.state = BroadcastState::Completed;
                        })
                        .await
                        .is_ok()
                    {
                        info!(id = %id, "broadcast completed");
                    }
                    return;
                }
                Ok(TransmissionStatus::Failed) => {
                    warn!(id = %id, "network reported terminal failure");
                    self.fail(
                        id,
                        &[BroadcastState::Transmitting],
                        FailureReason::TransmissionFailed,
                    )
                    .await;
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!(id = %id, error = %e, "transmission status poll failed"),
            }
            if Instant::now() >= deadline {
                warn!(id = %id, "transmission polling exceeded budget");
                self.fail(
                    id,
                    &[BroadcastState::Transmitting],
                    FailureReason::BroadcastTimeout,
                )
                .await;
                return;
            }
            tokio::time::sleep(self.config.status_poll_interval()).await;
        }
    }

    async fn state_of(&self, id: BroadcastId) -> Option<BroadcastState> {
        self.records.read().await.get(&id).map(|r| r.state)
    }

    async fn payment_handle(&self, id: BroadcastId) -> Option<PaymentHandle> {
        self.records
            .read()
            .await
            .get(&id)
            .and_then(|r| r.invoice.as_ref())
            .map(|invoice| PaymentHandle {
                payreq: invoice.payreq.clone(),
            })
    }

    /// Compare-and-advance: mutate the record only if it is still in one of
    /// the expected states, persisting before the in-memory commit.
    async fn transition(
        &self,
        id: BroadcastId,
        expected: &[BroadcastState],
        apply: impl FnOnce(&mut BroadcastRecord),
    ) -> std::result::Result<BroadcastRecord, TransitionError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(TransitionError::Superseded)?;
        if !expected.contains(&record.state) {
            debug!(id = %id, state = %record.state, "transition superseded");
            return Err(TransitionError::Superseded);
        }
        let mut candidate = record.clone();
        apply(&mut candidate);
        candidate.updated_at = Utc::now();
        match self.store.update_broadcast(&candidate).await {
            Ok(()) => {
                info!(id = %id, from = %record.state, to = %candidate.state, "broadcast transition");
                *record = candidate.clone();
                Ok(candidate)
            }
            Err(e) => {
                error!(id = %id, error = %e, "broadcast transition persist failed, halting machine");
                Err(TransitionError::Storage(e))
            }
        }
    }

    async fn fail(&self, id: BroadcastId, expected: &[BroadcastState], reason: FailureReason) {
        match self
            .transition(id, expected, |r| {
                r.state = BroadcastState::Failed;
                r.error = Some(reason);
            })
            .await
        {
            Ok(_) => {}
            Err(TransitionError::Superseded) => {
                debug!(id = %id, "failure transition superseded")
            }
            Err(TransitionError::Storage(e)) => {
                error!(id = %id, error = %e, "could not persist failure state")
            }
        }
    }
}
