//! Link session: owns one transport and one deframer, runs the receive
//! loop, and exposes the command and health surface.
//!
//! The receive loop never blocks on consumers: decoded telemetry goes onto
//! the bounded event bus and workers take it from there. Command
//! acknowledgments are matched on the same loop that decodes frames.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use satlink_core::{
    BackoffConfig, Command, CommandId, CommandKind, CommandStatus, LinkConfig, LinkEvent,
    LinkHealth, LinkStatus, TelemetryBus,
};

use crate::error::{LinkError, Result};
use crate::frame::{self, AckPayload, Deframer, Frame, FrameType, PhotoChunk};
use crate::photo::PhotoAssembler;
use crate::transport::{ConfigConnector, Transport, TransportConnector};

const READ_BUF_LEN: usize = 2048;
const TICK_INTERVAL: Duration = Duration::from_millis(200);
const REQUEST_QUEUE: usize = 32;

/// Deterministic exponential backoff delay before retry `attempt` (1-based).
///
/// Doubles from the base and saturates at the cap; jitter is added by the
/// caller on top, so consecutive delays never shrink below this schedule.
pub fn backoff_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let millis = config.base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(millis.min(config.cap_ms))
}

fn with_jitter(delay: Duration) -> Duration {
    let cap = (delay.as_millis() as u64 / 4).max(1);
    let jitter = rand::thread_rng().gen_range(0..cap);
    delay + Duration::from_millis(jitter)
}

enum SessionRequest {
    SendCommand {
        command: Command,
        reply: oneshot::Sender<Result<Command>>,
    },
    Reconnect,
    Shutdown,
}

/// Handle to a running link session.
pub struct LinkSession {
    requests: mpsc::Sender<SessionRequest>,
    health: Arc<RwLock<LinkHealth>>,
    task: JoinHandle<()>,
}

impl LinkSession {
    /// Start a session against the configured transport.
    ///
    /// The session connects in the background; a failed first attempt puts
    /// it in `Degraded` and the backoff schedule takes over. Failures reach
    /// callers as link-health state, not errors.
    pub fn connect(config: LinkConfig, bus: TelemetryBus) -> Self {
        let connector = Arc::new(ConfigConnector::new(config.transport.clone()));
        Self::with_connector(config, bus, connector)
    }

    /// Start a session with a custom transport connector (test seam).
    pub fn with_connector(
        config: LinkConfig,
        bus: TelemetryBus,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let health = Arc::new(RwLock::new(LinkHealth::starting()));
        let actor = SessionActor {
            photos: PhotoAssembler::new(config.photo_timeout()),
            config,
            bus,
            connector,
            requests: rx,
            health: health.clone(),
            deframer: Deframer::new(),
            pending_acks: HashMap::new(),
            bad_frames: VecDeque::new(),
        };
        let task = tokio::spawn(actor.run());
        Self {
            requests: tx,
            health,
            task,
        }
    }

    /// Send a command and wait for its acknowledgment.
    ///
    /// Fails immediately with [`LinkError::Unavailable`] while the link is
    /// not connected; commands are never queued. On ack timeout or
    /// rejection the command is terminal `Failed` and is not retried.
    pub async fn send_command(
        &self,
        kind: CommandKind,
        parameters: Vec<(String, String)>,
    ) -> Result<Command> {
        let command = Command::new(kind, parameters);
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest::SendCommand { command, reply })
            .await
            .map_err(|_| LinkError::Closed)?;
        response.await.map_err(|_| LinkError::Closed)?
    }

    /// Current link health snapshot.
    pub async fn health(&self) -> LinkHealth {
        self.health.read().await.clone()
    }

    /// Request a reconnect after the session reported `Disconnected`.
    pub async fn reconnect(&self) -> Result<()> {
        self.requests
            .send(SessionRequest::Reconnect)
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Stop the session and wait for the actor to finish.
    pub async fn shutdown(self) {
        let _ = self.requests.send(SessionRequest::Shutdown).await;
        let _ = self.task.await;
    }
}

enum Step {
    Read(io::Result<usize>),
    Request(Option<SessionRequest>),
    Tick,
}

enum LoopExit {
    Reconnect,
    Shutdown,
}

/// Marker for "the session was asked to stop".
struct Stop;

struct PendingAck {
    command: Command,
    reply: oneshot::Sender<Result<Command>>,
    deadline: Instant,
}

struct SessionActor {
    config: LinkConfig,
    bus: TelemetryBus,
    connector: Arc<dyn TransportConnector>,
    requests: mpsc::Receiver<SessionRequest>,
    health: Arc<RwLock<LinkHealth>>,
    deframer: Deframer,
    photos: PhotoAssembler,
    pending_acks: HashMap<CommandId, PendingAck>,
    bad_frames: VecDeque<Instant>,
}

impl SessionActor {
    async fn run(mut self) {
        info!(endpoint = %self.config.transport.endpoint(), "link session starting");
        'session: loop {
            let mut transport = match self.connect_with_backoff().await {
                Ok(transport) => transport,
                Err(Stop) => break 'session,
            };
            info!("link connected");

            match self.serve(transport.as_mut()).await {
                LoopExit::Reconnect => {
                    transport.close().await;
                    self.fail_pending();
                    self.set_status(LinkStatus::Degraded).await;
                }
                LoopExit::Shutdown => {
                    transport.close().await;
                    break 'session;
                }
            }
        }
        self.fail_pending();
        self.set_status(LinkStatus::Disconnected).await;
        info!("link session stopped");
    }

    /// Connect, backing off between attempts. After the ceiling the session
    /// goes `Disconnected` and waits for an explicit reconnect request.
    async fn connect_with_backoff(&mut self) -> std::result::Result<Box<dyn Transport>, Stop> {
        loop {
            match self.connector.connect().await {
                Ok(transport) => {
                    self.reset_attempts().await;
                    self.bad_frames.clear();
                    self.set_status(LinkStatus::Connected).await;
                    return Ok(transport);
                }
                Err(e) => {
                    let attempts = self.bump_attempts().await;
                    if attempts > self.config.backoff.max_attempts {
                        warn!(error = %e, attempts, "reconnect ceiling exceeded");
                        self.set_status(LinkStatus::Disconnected).await;
                        self.wait_for_reconnect().await?;
                        self.reset_attempts().await;
                        self.set_status(LinkStatus::Degraded).await;
                        continue;
                    }
                    self.set_status(LinkStatus::Degraded).await;
                    let delay = with_jitter(backoff_delay(&self.config.backoff, attempts));
                    debug!(error = %e, attempt = attempts, ?delay, "connect failed, backing off");
                    self.sleep_responsive(delay).await?;
                }
            }
        }
    }

    /// Park until the operator asks for a reconnect. Commands fail fast.
    async fn wait_for_reconnect(&mut self) -> std::result::Result<(), Stop> {
        loop {
            match self.requests.recv().await {
                Some(SessionRequest::Reconnect) => return Ok(()),
                Some(SessionRequest::SendCommand { mut command, reply }) => {
                    command.status = CommandStatus::Failed;
                    let _ = reply.send(Err(LinkError::Unavailable));
                }
                Some(SessionRequest::Shutdown) | None => return Err(Stop),
            }
        }
    }

    /// Sleep through the backoff delay while still answering requests.
    async fn sleep_responsive(&mut self, delay: Duration) -> std::result::Result<(), Stop> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                request = self.requests.recv() => match request {
                    Some(SessionRequest::SendCommand { mut command, reply }) => {
                        command.status = CommandStatus::Failed;
                        let _ = reply.send(Err(LinkError::Unavailable));
                    }
                    // An explicit reconnect skips the rest of the wait.
                    Some(SessionRequest::Reconnect) => return Ok(()),
                    Some(SessionRequest::Shutdown) | None => return Err(Stop),
                },
            }
        }
    }

    /// Connected phase: decode frames, match acks, serve commands.
    async fn serve(&mut self, transport: &mut dyn Transport) -> LoopExit {
        let mut read_buf = vec![0u8; READ_BUF_LEN];
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let step = tokio::select! {
                result = transport.read(&mut read_buf) => Step::Read(result),
                request = self.requests.recv() => Step::Request(request),
                _ = tick.tick() => Step::Tick,
            };

            match step {
                Step::Read(Ok(0)) => {
                    warn!("transport closed by peer");
                    return LoopExit::Reconnect;
                }
                Step::Read(Ok(n)) => {
                    self.deframer.extend(&read_buf[..n]);
                    if self.drain_frames().await {
                        warn!("frame error rate over threshold, forcing reconnect");
                        return LoopExit::Reconnect;
                    }
                }
                Step::Read(Err(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Step::Read(Err(e)) => {
                    warn!(error = %e, "transport read failed");
                    return LoopExit::Reconnect;
                }
                Step::Request(Some(SessionRequest::SendCommand { mut command, reply })) => {
                    let encoded =
                        Frame::new(FrameType::Command, frame::encode_command(&command)).encode();
                    match transport.write_all(&encoded).await {
                        Ok(()) => {
                            command.status = CommandStatus::Sent;
                            debug!(id = %command.id, kind = ?command.kind, "command sent");
                            let deadline = Instant::now() + self.config.ack_timeout();
                            self.pending_acks
                                .insert(command.id, PendingAck { command, reply, deadline });
                        }
                        Err(e) => {
                            warn!(error = %e, "command write failed");
                            command.status = CommandStatus::Failed;
                            let _ = reply.send(Err(LinkError::Transport(e)));
                            return LoopExit::Reconnect;
                        }
                    }
                }
                Step::Request(Some(SessionRequest::Reconnect)) => {
                    self.reset_attempts().await;
                }
                Step::Request(Some(SessionRequest::Shutdown)) | Step::Request(None) => {
                    return LoopExit::Shutdown;
                }
                Step::Tick => {
                    self.sweep_ack_timeouts();
                    self.sweep_photo_deadlines();
                }
            }
        }
    }

    /// Decode everything buffered. Returns `true` when the bad-frame rate
    /// forces a reconnect.
    async fn drain_frames(&mut self) -> bool {
        while let Some(item) = self.deframer.next_frame() {
            match item {
                Ok(frame) => {
                    self.mark_frame_received().await;
                    self.on_frame(frame).await;
                }
                Err(e) => {
                    debug!(error = %e, "dropping invalid frame");
                    if self.record_bad_frame() {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn on_frame(&mut self, frame: Frame) {
        match frame.frame_type {
            FrameType::Telemetry => match frame::decode_telemetry(&frame.payload, &self.config.link_id) {
                Ok(reading) => {
                    self.bus.publish(LinkEvent::Telemetry(reading));
                }
                Err(e) => warn!(error = %e, "telemetry payload did not decode"),
            },
            FrameType::PhotoChunk => match PhotoChunk::decode(&frame.payload) {
                Ok(chunk) => {
                    let photo_id = chunk.photo_id;
                    if let Some(data) = self.photos.insert(chunk) {
                        info!(photo_id, bytes = data.len(), "photo completed");
                        self.bus.publish(LinkEvent::PhotoCompleted { photo_id, data });
                    }
                }
                Err(e) => warn!(error = %e, "photo chunk payload did not decode"),
            },
            FrameType::CommandAck => match AckPayload::decode(&frame.payload) {
                Ok(ack) => self.on_ack(ack),
                Err(e) => warn!(error = %e, "ack payload did not decode"),
            },
            FrameType::Command => {
                // Uplink-only frame type; nothing to do on the ground side.
                debug!("ignoring command frame from asset");
            }
        }
    }

    fn on_ack(&mut self, ack: AckPayload) {
        match self.pending_acks.remove(&ack.command_id) {
            Some(mut pending) => {
                if ack.accepted {
                    pending.command.status = CommandStatus::Acked;
                    let _ = pending.reply.send(Ok(pending.command));
                } else {
                    pending.command.status = CommandStatus::Failed;
                    let _ = pending.reply.send(Err(LinkError::Rejected));
                }
            }
            None => debug!(id = %ack.command_id, "ack for unknown or expired command"),
        }
    }

    /// Record a checksum/framing failure; `true` when the rate threshold is
    /// crossed within the window (treated as a sign of desync).
    fn record_bad_frame(&mut self) -> bool {
        let now = Instant::now();
        let window = self.config.frame_error_window();
        self.bad_frames.push_back(now);
        while let Some(first) = self.bad_frames.front() {
            if now.duration_since(*first) > window {
                self.bad_frames.pop_front();
            } else {
                break;
            }
        }
        if self.bad_frames.len() >= self.config.frame_error_threshold as usize {
            self.bad_frames.clear();
            return true;
        }
        false
    }

    fn sweep_ack_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<CommandId> = self
            .pending_acks
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(mut pending) = self.pending_acks.remove(&id) {
                warn!(id = %id, "command ack timed out");
                pending.command.status = CommandStatus::Failed;
                let _ = pending.reply.send(Err(LinkError::AckTimeout));
            }
        }
    }

    fn sweep_photo_deadlines(&mut self) {
        for (photo_id, received, total) in self.photos.expire() {
            warn!(photo_id, received, total, "photo assembly timed out, discarding");
            self.bus.publish(LinkEvent::PhotoIncomplete {
                photo_id,
                received,
                total,
            });
        }
    }

    /// Fail every outstanding command; the link dropped under them.
    fn fail_pending(&mut self) {
        for (_, mut pending) in self.pending_acks.drain() {
            pending.command.status = CommandStatus::Failed;
            let _ = pending.reply.send(Err(LinkError::Unavailable));
        }
    }

    async fn set_status(&self, status: LinkStatus) {
        let mut health = self.health.write().await;
        if health.status != status {
            health.status = status;
            let snapshot = health.clone();
            drop(health);
            info!(status = %status, "link status changed");
            self.bus.publish(LinkEvent::HealthChanged(snapshot));
        }
    }

    async fn bump_attempts(&self) -> u32 {
        let mut health = self.health.write().await;
        health.reconnect_attempts += 1;
        health.reconnect_attempts
    }

    async fn reset_attempts(&self) {
        self.health.write().await.reconnect_attempts = 0;
    }

    /// Every successfully decoded frame resets the backoff counter and
    /// refreshes the liveness timestamp.
    async fn mark_frame_received(&self) {
        let mut health = self.health.write().await;
        health.reconnect_attempts = 0;
        health.last_reading_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base_ms: u64, cap_ms: u64) -> BackoffConfig {
        BackoffConfig {
            base_ms,
            cap_ms,
            max_attempts: 10,
        }
    }

    #[test]
    fn test_backoff_is_non_decreasing_up_to_cap() {
        let config = backoff(500, 30_000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = backoff_delay(&config, attempt);
            assert!(delay >= previous, "attempt {} regressed", attempt);
            assert!(delay <= config.cap());
            previous = delay;
        }
        assert_eq!(previous, config.cap());
    }

    #[test]
    fn test_backoff_first_attempt_is_base() {
        let config = backoff(250, 10_000);
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(250));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(500));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_saturates_without_overflow() {
        let config = backoff(u64::MAX / 2, u64::MAX);
        assert_eq!(backoff_delay(&config, 40), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_jitter_never_shrinks_the_delay() {
        let delay = Duration::from_millis(1000);
        for _ in 0..100 {
            assert!(with_jitter(delay) >= delay);
        }
    }
}
