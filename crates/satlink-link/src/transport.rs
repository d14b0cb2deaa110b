//! Transport adapters: one duplex byte-stream interface over TCP, UDP, or a
//! serial line.
//!
//! The session is written once against [`Transport`]; reconnection logic
//! lives above this layer and simply asks the connector for a fresh
//! transport.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

use satlink_core::TransportConfig;

/// Serial reads block at most this long, so the reader thread notices
/// shutdown promptly.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(200);

const SERIAL_CHUNK: usize = 512;

/// Duplex byte stream to the asset.
///
/// `read` returning `Ok(0)` means the transport is gone. A read error of
/// kind `TimedOut` or `WouldBlock` means no data yet, not a dead transport.
/// `read` must be cancellation-safe: the session polls it inside `select!`.
#[async_trait]
pub trait Transport: Send {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    async fn close(&mut self);
}

/// Connects transports on demand; the seam tests substitute.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> io::Result<Box<dyn Transport>>;
}

/// Connector backed by a [`TransportConfig`].
pub struct ConfigConnector {
    config: TransportConfig,
}

impl ConfigConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for ConfigConnector {
    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        connect(&self.config).await
    }
}

/// Open a transport for the given endpoint.
pub async fn connect(config: &TransportConfig) -> io::Result<Box<dyn Transport>> {
    match config {
        TransportConfig::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(TcpTransport { stream }))
        }
        TransportConfig::Udp { bind, peer } => {
            let socket = UdpSocket::bind(bind.as_str()).await?;
            // Connecting pairs the socket with one peer and surfaces ICMP
            // errors as io errors on recv.
            socket.connect(peer.as_str()).await?;
            Ok(Box::new(UdpTransport { socket }))
        }
        TransportConfig::Serial { device, baud_rate } => {
            let device = device.clone();
            let baud_rate = *baud_rate;
            let port = tokio::task::spawn_blocking(move || {
                serialport::new(device.as_str(), baud_rate)
                    .timeout(SERIAL_READ_TIMEOUT)
                    .open()
            })
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;
            SerialTransport::start(port).map(|t| Box::new(t) as Box<dyn Transport>)
        }
    }
}

/// Stream socket transport.
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Datagram socket transport, connected to a single peer.
pub struct UdpTransport {
    socket: UdpSocket,
}

#[async_trait]
impl Transport for UdpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.socket.send(buf).await.map(|_| ())
    }

    async fn close(&mut self) {}
}

/// Serial line transport.
///
/// serialport I/O is blocking, so a dedicated reader thread pumps the port
/// into a channel; `read` just awaits the channel, which keeps it
/// cancellation-safe. Writes go through a cloned port handle.
pub struct SerialTransport {
    writer: Option<Box<dyn serialport::SerialPort>>,
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    leftover: Vec<u8>,
    stop: Arc<AtomicBool>,
}

impl SerialTransport {
    fn start(port: Box<dyn serialport::SerialPort>) -> io::Result<Self> {
        let reader = port
            .try_clone()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let (tx, rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        std::thread::Builder::new()
            .name("satlink-serial-rx".to_string())
            .spawn(move || Self::pump(reader, tx, stop_flag))?;
        Ok(Self {
            writer: Some(port),
            rx,
            leftover: Vec::new(),
            stop,
        })
    }

    fn pump(
        mut port: Box<dyn serialport::SerialPort>,
        tx: mpsc::Sender<io::Result<Vec<u8>>>,
        stop: Arc<AtomicBool>,
    ) {
        let mut buf = [0u8; SERIAL_CHUNK];
        while !stop.load(Ordering::Relaxed) {
            match std::io::Read::read(&mut port, &mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    }

    fn serve_leftover(&mut self, buf: &mut [u8]) -> usize {
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        n
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.leftover.is_empty() {
            return Ok(self.serve_leftover(buf));
        }
        match self.rx.recv().await {
            Some(Ok(bytes)) => {
                self.leftover = bytes;
                Ok(self.serve_leftover(buf))
            }
            Some(Err(e)) => Err(e),
            // Reader thread gone: the port is dead.
            None => Ok(0),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut port = self
            .writer
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))?;
        let data = buf.to_vec();
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = std::io::Write::write_all(&mut port, &data)
                .and_then(|()| std::io::Write::flush(&mut port));
            (port, result)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.writer = Some(port);
        result
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.writer = None;
        self.rx.close();
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
