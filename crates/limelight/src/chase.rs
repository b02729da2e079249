//! Channel-table chase playback
//!
//! One pass through a [`ChannelTable`] at a configured rate, each frame
//! written to a [`DmxTransport`]. Runs on its own thread; re-triggering
//! signals the previous pass to stop at its next step boundary and joins it
//! before the new pass starts, so two passes never interleave on the same
//! actuator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use limeproto::{ChannelTable, DmxFrame};

/// Anything that can carry a DMX frame to the outside world
pub trait DmxTransport: Send + Sync {
    fn send_frame(&self, frame: &DmxFrame) -> Result<()>;
}

struct ChaseRun {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Plays one pass through a channel table per trigger
pub struct ChasePlayer {
    table: Arc<ChannelTable>,
    step: Duration,
    transport: Arc<dyn DmxTransport>,
    current: Mutex<Option<ChaseRun>>,
}

impl ChasePlayer {
    /// `rate_hz` is frames per second; rates at or below zero fall back to
    /// one frame per second.
    pub fn new(table: Arc<ChannelTable>, rate_hz: f64, transport: Arc<dyn DmxTransport>) -> Self {
        let rate = if rate_hz > 0.0 { rate_hz } else { 1.0 };
        Self {
            table,
            step: Duration::from_secs_f64(1.0 / rate),
            transport,
            current: Mutex::new(None),
        }
    }

    /// Start one pass, cancelling and joining any pass still in progress
    pub fn trigger(&self) {
        if self.table.is_empty() {
            debug!("chase trigger on empty table ignored");
            return;
        }

        let mut current = self.current.lock().unwrap();
        if let Some(run) = current.take() {
            run.stop.store(true, Ordering::Relaxed);
            let _ = run.handle.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let table = self.table.clone();
            let transport = self.transport.clone();
            let stop = stop.clone();
            let step = self.step;
            thread::spawn(move || run_pass(table, step, transport, stop))
        };
        *current = Some(ChaseRun { stop, handle });
    }

    /// Signal the in-progress pass (if any) to stop and wait for it
    pub fn cancel(&self) {
        let mut current = self.current.lock().unwrap();
        if let Some(run) = current.take() {
            run.stop.store(true, Ordering::Relaxed);
            let _ = run.handle.join();
        }
    }

    /// Whether a pass is currently running
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }
}

impl Drop for ChasePlayer {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_pass(
    table: Arc<ChannelTable>,
    step: Duration,
    transport: Arc<dyn DmxTransport>,
    stop: Arc<AtomicBool>,
) {
    for index in 0..table.len() {
        // Cooperative cancel at each step boundary
        if stop.load(Ordering::Relaxed) {
            debug!(at = index, "chase pass cancelled");
            return;
        }
        let Some(frame) = table.frame(index) else {
            return;
        };
        if let Err(e) = transport.send_frame(frame) {
            warn!(at = index, error = %e, "chase transport fault, pass abandoned");
            return;
        }
        thread::sleep(step);
    }
    debug!(frames = table.len(), "chase pass complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Transport mock recording the first channel of every frame it sees
    struct RecordingTransport {
        seen: Mutex<Vec<u8>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl DmxTransport for RecordingTransport {
        fn send_frame(&self, frame: &DmxFrame) -> Result<()> {
            self.seen.lock().unwrap().push(frame.get(0));
            Ok(())
        }
    }

    fn staircase_table(steps: u8) -> Arc<ChannelTable> {
        let rows: Vec<Vec<u8>> = (0..steps).map(|i| vec![i]).collect();
        Arc::new(ChannelTable::from_rows(&rows))
    }

    fn wait_until_idle(player: &ChasePlayer, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while player.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_single_pass_in_order() {
        let transport = RecordingTransport::new();
        let player = ChasePlayer::new(staircase_table(10), 1000.0, transport.clone());

        player.trigger();
        wait_until_idle(&player, Duration::from_secs(5));

        let seen = transport.seen.lock().unwrap();
        assert_eq!(*seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_retrigger_never_interleaves() {
        let transport = RecordingTransport::new();
        let player = ChasePlayer::new(staircase_table(50), 500.0, transport.clone());

        player.trigger();
        thread::sleep(Duration::from_millis(20));
        player.trigger();
        wait_until_idle(&player, Duration::from_secs(10));

        let seen = transport.seen.lock().unwrap();
        // Exactly one complete sequence at the tail; whatever the first pass
        // managed before cancellation is a strictly increasing prefix.
        assert!(seen.len() >= 50);
        assert!(seen.len() < 100);
        assert_eq!(seen[seen.len() - 50..], (0..50).collect::<Vec<u8>>()[..]);
        let prefix = &seen[..seen.len() - 50];
        assert!(prefix.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_cancel_stops_pass() {
        let transport = RecordingTransport::new();
        let player = ChasePlayer::new(staircase_table(200), 100.0, transport.clone());

        player.trigger();
        thread::sleep(Duration::from_millis(50));
        player.cancel();
        assert!(!player.is_running());

        let seen_after_cancel = transport.seen.lock().unwrap().len();
        assert!(seen_after_cancel < 200);
    }

    #[test]
    fn test_empty_table_is_noop() {
        let transport = RecordingTransport::new();
        let player = ChasePlayer::new(Arc::new(ChannelTable::default()), 30.0, transport.clone());
        player.trigger();
        assert!(!player.is_running());
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    /// Transport that always fails
    struct FaultyTransport;
    impl DmxTransport for FaultyTransport {
        fn send_frame(&self, _frame: &DmxFrame) -> Result<()> {
            anyhow::bail!("cable unplugged")
        }
    }

    #[test]
    fn test_transport_fault_abandons_pass() {
        let player = ChasePlayer::new(staircase_table(10), 1000.0, Arc::new(FaultyTransport));
        player.trigger();
        wait_until_idle(&player, Duration::from_secs(2));
        // No panic, pass simply ended
        assert!(!player.is_running());
    }
}
