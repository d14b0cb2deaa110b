//! State machine tests against mock gateways.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use satlink_broadcast::{
    BroadcastError, BroadcastNetworkGateway, BroadcastOrchestrator, GatewayError, PaymentGateway,
    PaymentHandle, PaymentStatus, SubmissionReceipt, TransmissionStatus,
};
use satlink_core::{
    AlertEvent, BroadcastConfig, BroadcastRecord, BroadcastState, FailureReason, Invoice,
    TelemetryReading,
};
use satlink_storage::{MemoryStore, TelemetryStore};

struct MockNetwork {
    reject_submit: bool,
    submit_calls: AtomicU32,
    statuses: tokio::sync::Mutex<VecDeque<TransmissionStatus>>,
    default_status: TransmissionStatus,
}

impl MockNetwork {
    fn new(default_status: TransmissionStatus) -> Arc<Self> {
        Arc::new(Self {
            reject_submit: false,
            submit_calls: AtomicU32::new(0),
            statuses: tokio::sync::Mutex::new(VecDeque::new()),
            default_status,
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject_submit: true,
            submit_calls: AtomicU32::new(0),
            statuses: tokio::sync::Mutex::new(VecDeque::new()),
            default_status: TransmissionStatus::Pending,
        })
    }

    async fn script_statuses(&self, statuses: &[TransmissionStatus]) {
        self.statuses.lock().await.extend(statuses.iter().copied());
    }
}

#[async_trait]
impl BroadcastNetworkGateway for MockNetwork {
    async fn submit(
        &self,
        _file_path: &str,
        bid_msat: u64,
    ) -> Result<SubmissionReceipt, GatewayError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_submit {
            return Err(GatewayError::Rejected("bid too low".to_string()));
        }
        Ok(SubmissionReceipt {
            invoice: Invoice {
                payreq: "lnbc1testpayreq".to_string(),
                amount_msat: bid_msat,
            },
            network_message_id: "order-123".to_string(),
            auth_token: "token-abc".to_string(),
        })
    }

    async fn poll_status(
        &self,
        _network_message_id: &str,
        auth_token: Option<&str>,
    ) -> Result<TransmissionStatus, GatewayError> {
        assert!(auth_token.is_some(), "status poll must carry the auth token");
        Ok(self
            .statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(self.default_status))
    }
}

struct MockPayer {
    fail_pay: bool,
    pay_calls: AtomicU32,
    statuses: tokio::sync::Mutex<VecDeque<PaymentStatus>>,
    default_status: PaymentStatus,
}

impl MockPayer {
    fn new(default_status: PaymentStatus) -> Arc<Self> {
        Arc::new(Self {
            fail_pay: false,
            pay_calls: AtomicU32::new(0),
            statuses: tokio::sync::Mutex::new(VecDeque::new()),
            default_status,
        })
    }

    fn failing_pay() -> Arc<Self> {
        Arc::new(Self {
            fail_pay: true,
            pay_calls: AtomicU32::new(0),
            statuses: tokio::sync::Mutex::new(VecDeque::new()),
            default_status: PaymentStatus::Pending,
        })
    }
}

#[async_trait]
impl PaymentGateway for MockPayer {
    async fn pay(&self, _invoice: &Invoice) -> Result<PaymentHandle, GatewayError> {
        self.pay_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pay {
            return Err(GatewayError::Payer("no route".to_string()));
        }
        Ok(PaymentHandle {
            payreq: "lnbc1testpayreq".to_string(),
        })
    }

    async fn poll(&self, _handle: &PaymentHandle) -> Result<PaymentStatus, GatewayError> {
        Ok(self
            .statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(self.default_status))
    }
}

/// Store wrapper that records the state of every persisted transition.
struct RecordingStore {
    inner: MemoryStore,
    states: std::sync::Mutex<Vec<BroadcastState>>,
}

impl RecordingStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            states: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn transitions(&self) -> Vec<BroadcastState> {
        self.states.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryStore for RecordingStore {
    async fn append_reading(&self, reading: &TelemetryReading) -> satlink_storage::Result<()> {
        self.inner.append_reading(reading).await
    }
    async fn query_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> satlink_storage::Result<Vec<TelemetryReading>> {
        self.inner.query_readings(start, end).await
    }
    async fn latest_reading(&self) -> satlink_storage::Result<Option<TelemetryReading>> {
        self.inner.latest_reading().await
    }
    async fn append_alert(&self, event: &AlertEvent) -> satlink_storage::Result<()> {
        self.inner.append_alert(event).await
    }
    async fn alert_history(&self, limit: usize) -> satlink_storage::Result<Vec<AlertEvent>> {
        self.inner.alert_history(limit).await
    }
    async fn append_broadcast(&self, record: &BroadcastRecord) -> satlink_storage::Result<()> {
        self.states.lock().unwrap().push(record.state);
        self.inner.append_broadcast(record).await
    }
    async fn update_broadcast(&self, record: &BroadcastRecord) -> satlink_storage::Result<()> {
        self.states.lock().unwrap().push(record.state);
        self.inner.update_broadcast(record).await
    }
    async fn broadcast_history(&self) -> satlink_storage::Result<Vec<BroadcastRecord>> {
        self.inner.broadcast_history().await
    }
}

fn fast_config() -> BroadcastConfig {
    BroadcastConfig {
        api_base: "unused".to_string(),
        default_bid_msat: 10_000,
        payment_poll_secs: 0,
        payment_timeout_secs: 30,
        status_poll_secs: 0,
        status_timeout_secs: 30,
        lightning_cli: "unused".to_string(),
    }
}

#[tokio::test]
async fn test_happy_path_transitions_in_strict_order() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Pending);
    network
        .script_statuses(&[
            TransmissionStatus::Pending,
            TransmissionStatus::Transmitting,
            TransmissionStatus::Completed,
        ])
        .await;
    let payer = MockPayer::new(PaymentStatus::Paid);

    let orchestrator = BroadcastOrchestrator::new(
        store.clone(),
        network.clone(),
        payer.clone(),
        fast_config(),
    );

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let record = orchestrator.wait(id).await.unwrap();

    assert_eq!(record.state, BroadcastState::Completed);
    assert!(record.error.is_none());
    assert_eq!(
        store.transitions(),
        vec![
            BroadcastState::Created,
            BroadcastState::Invoiced,
            BroadcastState::PaymentPending,
            BroadcastState::Paid,
            BroadcastState::Transmitting,
            BroadcastState::Completed,
        ]
    );
    // Every persisted step advances by exactly one stage: nothing skipped.
    for pair in store.transitions().windows(2) {
        assert_eq!(pair[1].rank(), pair[0].rank() + 1);
    }
    assert_eq!(payer.pay_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_submission_rejected() {
    let store = RecordingStore::new();
    let network = MockNetwork::rejecting();
    let payer = MockPayer::new(PaymentStatus::Paid);
    let orchestrator =
        BroadcastOrchestrator::new(store.clone(), network, payer.clone(), fast_config());

    let result = orchestrator.submit("/tmp/payload.bin", 10).await;
    assert!(matches!(result, Err(BroadcastError::SubmissionRejected(_))));

    let history = orchestrator.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].state, BroadcastState::Failed);
    assert_eq!(history[0].error, Some(FailureReason::SubmissionRejected));
    // Payment was never touched.
    assert_eq!(payer.pay_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_payment_failure_terminates_without_retry() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Pending);
    let payer = MockPayer::failing_pay();
    let orchestrator =
        BroadcastOrchestrator::new(store.clone(), network, payer.clone(), fast_config());

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let record = orchestrator.wait(id).await.unwrap();

    assert_eq!(record.state, BroadcastState::Failed);
    assert_eq!(record.error, Some(FailureReason::PaymentFailed));
    // Exactly one attempt; financial operations are never auto-retried.
    assert_eq!(payer.pay_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_payment_timeout_fails_closed() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Pending);
    // Payment never settles.
    let payer = MockPayer::new(PaymentStatus::Pending);
    let mut config = fast_config();
    config.payment_timeout_secs = 0;
    let orchestrator = BroadcastOrchestrator::new(store.clone(), network, payer, config);

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let record = orchestrator.wait(id).await.unwrap();

    assert_eq!(record.state, BroadcastState::Failed);
    assert_eq!(record.error, Some(FailureReason::PaymentFailed));
}

#[tokio::test]
async fn test_transmit_timeout_is_broadcast_timeout() {
    let store = RecordingStore::new();
    // Paid instantly, but the network never reaches a terminal status.
    let network = MockNetwork::new(TransmissionStatus::Transmitting);
    let payer = MockPayer::new(PaymentStatus::Paid);
    let mut config = fast_config();
    config.status_timeout_secs = 0;
    let orchestrator = BroadcastOrchestrator::new(store.clone(), network, payer, config);

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let record = orchestrator.wait(id).await.unwrap();

    // Reached paid, then timed out transmitting: never silently stuck.
    assert_eq!(record.state, BroadcastState::Failed);
    assert_eq!(record.error, Some(FailureReason::BroadcastTimeout));
    let states = store.transitions();
    assert!(states.contains(&BroadcastState::Paid));
    assert!(states.contains(&BroadcastState::Transmitting));
}

#[tokio::test]
async fn test_network_terminal_failure() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Failed);
    let payer = MockPayer::new(PaymentStatus::Paid);
    let orchestrator = BroadcastOrchestrator::new(store.clone(), network, payer, fast_config());

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let record = orchestrator.wait(id).await.unwrap();

    assert_eq!(record.state, BroadcastState::Failed);
    assert_eq!(record.error, Some(FailureReason::TransmissionFailed));
}

#[tokio::test]
async fn test_duplicate_in_flight_rejected() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Pending);
    // Payment stays pending so the first request remains in flight.
    let payer = MockPayer::new(PaymentStatus::Pending);
    let orchestrator =
        BroadcastOrchestrator::new(store.clone(), network, payer, fast_config());

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let second = orchestrator.submit("/tmp/payload.bin", 20_000).await;
    assert!(matches!(second, Err(BroadcastError::DuplicateInFlight(_))));

    // A different path is fine.
    orchestrator.submit("/tmp/other.bin", 10_000).await.unwrap();

    // After the first terminates, the path is free again.
    orchestrator.cancel(id).await.unwrap();
    orchestrator.wait(id).await.unwrap();
    orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
}

#[tokio::test]
async fn test_cancel_before_payment_wins_over_driver() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Pending);
    let payer = MockPayer::new(PaymentStatus::Pending);
    let orchestrator =
        BroadcastOrchestrator::new(store.clone(), network, payer, fast_config());

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();
    let cancelled = orchestrator.cancel(id).await.unwrap();
    assert_eq!(cancelled.state, BroadcastState::Failed);
    assert_eq!(cancelled.error, Some(FailureReason::Cancelled));

    // The driver observes the cancel and stops; the record is not
    // resurrected to a later state.
    let record = orchestrator.wait(id).await.unwrap();
    assert_eq!(record.state, BroadcastState::Failed);
    assert_eq!(record.error, Some(FailureReason::Cancelled));
}

#[tokio::test]
async fn test_cancel_refused_once_paid() {
    let store = RecordingStore::new();
    let network = MockNetwork::new(TransmissionStatus::Transmitting);
    let payer = MockPayer::new(PaymentStatus::Paid);
    let mut config = fast_config();
    config.status_poll_secs = 1;
    let orchestrator = BroadcastOrchestrator::new(store.clone(), network, payer, config);

    let id = orchestrator.submit("/tmp/payload.bin", 10_000).await.unwrap();

    // Wait until payment went through.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = orchestrator.get(id).await.unwrap().state;
        if matches!(state, BroadcastState::Paid | BroadcastState::Transmitting) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never reached paid");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    match orchestrator.cancel(id).await {
        Err(BroadcastError::CancelRefused(state)) => {
            assert!(matches!(
                state,
                BroadcastState::Paid | BroadcastState::Transmitting
            ));
        }
        other => panic!("expected CancelRefused, got {:?}", other.map(|r| r.state)),
    }
}

#[tokio::test]
async fn test_resume_repolls_without_resubmitting_or_repaying() {
    let store = RecordingStore::new();

    // A request interrupted mid-payment.
    let mut paying = BroadcastRecord::new("/tmp/paying.bin", 10_000);
    paying.state = BroadcastState::PaymentPending;
    paying.invoice = Some(Invoice {
        payreq: "lnbc1resume".to_string(),
        amount_msat: 10_000,
    });
    paying.network_message_id = Some("order-paying".to_string());
    paying.auth_token = Some("token".to_string());
    store.append_broadcast(&paying).await.unwrap();

    // A request interrupted mid-transmission.
    let mut transmitting = BroadcastRecord::new("/tmp/transmitting.bin", 10_000);
    transmitting.state = BroadcastState::Transmitting;
    transmitting.invoice = Some(Invoice {
        payreq: "lnbc1resume2".to_string(),
        amount_msat: 10_000,
    });
    transmitting.network_message_id = Some("order-transmitting".to_string());
    transmitting.auth_token = Some("token".to_string());
    store.append_broadcast(&transmitting).await.unwrap();

    // A request interrupted before payment was initiated.
    let invoiced = {
        let mut record = BroadcastRecord::new("/tmp/invoiced.bin", 10_000);
        record.state = BroadcastState::Invoiced;
        record.invoice = Some(Invoice {
            payreq: "lnbc1stale".to_string(),
            amount_msat: 10_000,
        });
        store.append_broadcast(&record).await.unwrap();
        record
    };

    let network = MockNetwork::new(TransmissionStatus::Completed);
    let payer = MockPayer::new(PaymentStatus::Paid);
    let orchestrator = BroadcastOrchestrator::new(
        store.clone(),
        network.clone(),
        payer.clone(),
        fast_config(),
    );

    let resumed = orchestrator.resume().await.unwrap();
    assert_eq!(resumed, 2);

    assert_eq!(
        orchestrator.wait(paying.id).await.unwrap().state,
        BroadcastState::Completed
    );
    assert_eq!(
        orchestrator.wait(transmitting.id).await.unwrap().state,
        BroadcastState::Completed
    );

    // Resume re-polls; it never re-submits or re-pays.
    assert_eq!(network.submit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(payer.pay_calls.load(Ordering::SeqCst), 0);

    // The pre-payment leftover is failed, not resumed.
    let stale = orchestrator.get(invoiced.id).await.unwrap();
    assert_eq!(stale.state, BroadcastState::Failed);
    assert_eq!(stale.error, Some(FailureReason::Cancelled));
}
