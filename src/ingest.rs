//! Background datagram receiver
//!
//! One std thread blocks on the socket and hands decoded text to the tick
//! loop over a bounded crossbeam channel. Nothing else is shared between the
//! two sides except the activity gate and the counters.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::error::Result;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 65_507;

/// Mirrors "a trial is running" (pre-stimulus start to post-stimulus end)
#[derive(Clone, Debug, Default)]
pub struct IngestGate(Arc<AtomicBool>);

impl IngestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dropped_inactive: AtomicU64,
    dropped_full: AtomicU64,
    invalid_utf8: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub received: u64,
    pub dropped_inactive: u64,
    pub dropped_full: u64,
    pub invalid_utf8: u64,
}

pub struct TelemetryReceiver {
    rx: Receiver<String>,
    local_addr: SocketAddr,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryReceiver {
    /// Bind `0.0.0.0:<port>` and start the receive thread
    pub fn spawn(port: u16, capacity: usize, gate: IngestGate) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Self::spawn_on(socket, capacity, gate)
    }

    pub fn spawn_on(socket: UdpSocket, capacity: usize, gate: IngestGate) -> Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let (tx, rx) = bounded(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let counters = Arc::clone(&counters);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("udp-receiver".to_string())
                .spawn(move || receive_loop(socket, tx, gate, counters, running))?
        };
        log::info!("Listening for telemetry on {}", local_addr);

        Ok(Self {
            rx,
            local_addr,
            counters,
            running,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next queued packet, if any
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, oldest first
    pub fn drain(&self) -> Vec<String> {
        self.rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dropped_inactive: self.counters.dropped_inactive.load(Ordering::Relaxed),
            dropped_full: self.counters.dropped_full.load(Ordering::Relaxed),
            invalid_utf8: self.counters.invalid_utf8.load(Ordering::Relaxed),
        }
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Receiver thread panicked");
            }
        }
    }
}

impl Drop for TelemetryReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive_loop(
    socket: UdpSocket,
    tx: Sender<String>,
    gate: IngestGate,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buf) {
            Ok((len, _)) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(e) => {
                log::warn!("Receive failed: {}", e);
                continue;
            }
        };

        if !gate.is_open() {
            counters.dropped_inactive.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(text) => text.to_string(),
            Err(_) => {
                counters.invalid_utf8.fetch_add(1, Ordering::Relaxed);
                log::warn!("Discarding non UTF-8 datagram ({} bytes)", len);
                continue;
            }
        };
        counters.received.fetch_add(1, Ordering::Relaxed);

        match tx.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.dropped_full.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("Packet channel closed, receiver exiting");
                break;
            }
        }
    }
}

/// Packets per second over a fixed test window
#[derive(Clone, Debug)]
pub struct PacketRateProbe {
    window: Duration,
    started: Option<Instant>,
    second_start: Option<Instant>,
    this_second: u64,
    per_second: Vec<u64>,
    total: u64,
}

impl PacketRateProbe {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: None,
            second_start: None,
            this_second: 0,
            per_second: Vec::new(),
            total: 0,
        }
    }

    pub fn count(&mut self, now: Instant) {
        self.roll(now);
        self.this_second += 1;
        self.total += 1;
    }

    /// Close finished one-second buckets
    pub fn roll(&mut self, now: Instant) {
        let start = *self.started.get_or_insert(now);
        let mut second = *self.second_start.get_or_insert(start);
        while now.duration_since(second) >= Duration::from_secs(1) {
            self.per_second.push(self.this_second);
            log::info!("Packets in second {}: {}", self.per_second.len(), self.this_second);
            self.this_second = 0;
            second += Duration::from_secs(1);
        }
        self.second_start = Some(second);
    }

    pub fn is_done(&self, now: Instant) -> bool {
        self.started
            .is_some_and(|start| now.duration_since(start) >= self.window)
    }

    /// Mean rate over the whole window
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs > 0.0 {
            self.total as f64 / secs
        } else {
            0.0
        }
    }

    pub fn per_second(&self) -> &[u64] {
        &self.per_second
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_receiver(capacity: usize, gate: IngestGate) -> (TelemetryReceiver, UdpSocket) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = TelemetryReceiver::spawn_on(socket, capacity, gate).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        (receiver, sender)
    }

    #[test]
    fn test_closed_gate_discards() {
        let gate = IngestGate::new();
        let (receiver, sender) = local_receiver(8, gate.clone());
        sender.send_to(b"0,1,2;1,3,4;", receiver.local_addr()).unwrap();
        assert!(receiver.recv_timeout(Duration::from_millis(300)).is_none());

        gate.open();
        sender.send_to(b"0,1,2;1,3,4;", receiver.local_addr()).unwrap();
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(2)).as_deref(),
            Some("0,1,2;1,3,4;")
        );
        let stats = receiver.stats();
        assert_eq!(stats.dropped_inactive, 1);
        assert_eq!(stats.received, 1);
    }

    #[test]
    fn test_full_channel_drops_and_counts() {
        let gate = IngestGate::new();
        gate.open();
        let (receiver, sender) = local_receiver(1, gate);
        for i in 0..3 {
            sender
                .send_to(format!("{},0,0;", i).as_bytes(), receiver.local_addr())
                .unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while receiver.stats().received < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(receiver.drain(), vec!["0,0,0;".to_string()]);
        assert_eq!(receiver.stats().dropped_full, 2);
    }

    #[test]
    fn test_rate_probe_buckets() {
        let start = Instant::now();
        let mut probe = PacketRateProbe::new(Duration::from_secs(2));
        for i in 0..30 {
            probe.count(start + Duration::from_millis(i * 50));
        }
        probe.roll(start + Duration::from_millis(2000));
        assert_eq!(probe.per_second(), &[20, 10]);
        assert!(probe.is_done(start + Duration::from_secs(2)));
        assert_eq!(probe.rate(), 15.0);
    }
}
