//! Streaming-ACN (E1.31) hand-off
//!
//! Limelight does not build E1.31 packets itself; the platform multicast
//! sender owns that format. This module's job is to hand the sender a
//! validated 512-channel frame per universe.

use std::sync::Arc;

use crate::dmx::DmxFrame;

/// Valid sACN universe range per E1.31
pub const SACN_UNIVERSE_MIN: u16 = 1;
pub const SACN_UNIVERSE_MAX: u16 = 63999;

#[derive(Debug, thiserror::Error)]
pub enum SacnError {
    #[error("universe {0} outside {SACN_UNIVERSE_MIN}..={SACN_UNIVERSE_MAX}")]
    UniverseOutOfRange(u16),

    #[error("multicast send failed: {0}")]
    SendFailed(String),
}

/// The platform's multicast sender. Receives already-validated frames.
pub trait MulticastDmxSender: Send + Sync {
    fn send_frame(&self, universe: u16, frame: &DmxFrame) -> Result<(), SacnError>;
}

/// Validating front for a [`MulticastDmxSender`]
pub struct SacnOutput {
    sender: Arc<dyn MulticastDmxSender>,
}

impl SacnOutput {
    pub fn new(sender: Arc<dyn MulticastDmxSender>) -> Self {
        Self { sender }
    }

    /// Validate the universe and hand the frame to the platform sender
    pub fn send(&self, universe: u16, frame: &DmxFrame) -> Result<(), SacnError> {
        if !(SACN_UNIVERSE_MIN..=SACN_UNIVERSE_MAX).contains(&universe) {
            return Err(SacnError::UniverseOutOfRange(universe));
        }
        self.sender.send_frame(universe, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSender {
        sent: Mutex<Vec<u16>>,
    }

    impl MulticastDmxSender for RecordingSender {
        fn send_frame(&self, universe: u16, _frame: &DmxFrame) -> Result<(), SacnError> {
            self.sent.lock().unwrap().push(universe);
            Ok(())
        }
    }

    #[test]
    fn test_valid_universe_delegates() {
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let output = SacnOutput::new(sender.clone());

        output.send(1, &DmxFrame::zeroed()).unwrap();
        output.send(63999, &DmxFrame::zeroed()).unwrap();
        assert_eq!(*sender.sent.lock().unwrap(), vec![1, 63999]);
    }

    #[test]
    fn test_invalid_universe_rejected() {
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
        });
        let output = SacnOutput::new(sender.clone());

        assert!(matches!(
            output.send(0, &DmxFrame::zeroed()),
            Err(SacnError::UniverseOutOfRange(0))
        ));
        assert!(output.send(64000, &DmxFrame::zeroed()).is_err());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
