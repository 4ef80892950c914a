//! Signing of delivered events.

use std::time::Instant;

use tracing::debug;

use crate::error::DispatchError;
use crate::event::{KeyAction, MotionAction};
use crate::verify::{VerifiedInputEvent, VerifiedKeyEvent, VerifiedMotionEvent};

/// Holds the per-dispatcher key.
///
/// Times are signed as nanoseconds since the manager was created, which is stable for the life
/// of the dispatcher.
pub(crate) struct HmacKeyManager {
    key: [u8; 32],
    epoch: Instant,
}

impl HmacKeyManager {
    pub fn new() -> Result<Self, DispatchError> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key)?;
        debug!("Generated event verification key");
        Ok(Self { key, epoch: Instant::now() })
    }

    fn nanos(&self, time: Instant) -> u64 {
        let nanos = time.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }

    fn encode(&self, event: &VerifiedInputEvent) -> Vec<u8> {
        let mut data = Vec::with_capacity(96);
        match event {
            VerifiedInputEvent::Key(key) => self.encode_key(key, &mut data),
            VerifiedInputEvent::Motion(motion) => self.encode_motion(motion, &mut data),
        }
        data
    }

    fn encode_key(&self, key: &VerifiedKeyEvent, data: &mut Vec<u8>) {
        data.push(0);
        data.extend_from_slice(&i32::from(key.device_id).to_le_bytes());
        data.extend_from_slice(&self.nanos(key.event_time).to_le_bytes());
        data.extend_from_slice(&key.source.bits().to_le_bytes());
        data.extend_from_slice(&i32::from(key.display_id).to_le_bytes());
        data.push(match key.action {
            KeyAction::Down => 0,
            KeyAction::Up => 1,
        });
        data.extend_from_slice(&self.nanos(key.down_time).to_le_bytes());
        data.extend_from_slice(&key.flags.bits().to_le_bytes());
        data.extend_from_slice(&key.key_code.to_le_bytes());
        data.extend_from_slice(&key.scan_code.to_le_bytes());
        data.extend_from_slice(&key.meta_state.bits().to_le_bytes());
        data.extend_from_slice(&key.repeat_count.to_le_bytes());
    }

    fn encode_motion(&self, motion: &VerifiedMotionEvent, data: &mut Vec<u8>) {
        data.push(1);
        data.extend_from_slice(&i32::from(motion.device_id).to_le_bytes());
        data.extend_from_slice(&self.nanos(motion.event_time).to_le_bytes());
        data.extend_from_slice(&motion.source.bits().to_le_bytes());
        data.extend_from_slice(&i32::from(motion.display_id).to_le_bytes());
        data.extend_from_slice(&motion.raw_x.to_le_bytes());
        data.extend_from_slice(&motion.raw_y.to_le_bytes());
        let (action, index) = match motion.action {
            MotionAction::Down => (0u8, 0usize),
            MotionAction::Up => (1, 0),
            MotionAction::Move => (2, 0),
            MotionAction::Cancel => (3, 0),
            MotionAction::Outside => (4, 0),
            MotionAction::PointerDown(index) => (5, index),
            MotionAction::PointerUp(index) => (6, index),
            MotionAction::HoverEnter => (7, 0),
            MotionAction::HoverMove => (8, 0),
            MotionAction::HoverExit => (9, 0),
            MotionAction::Scroll => (10, 0),
        };
        data.push(action);
        data.extend_from_slice(&(index as u32).to_le_bytes());
        data.extend_from_slice(&self.nanos(motion.down_time).to_le_bytes());
        data.extend_from_slice(&motion.flags.bits().to_le_bytes());
        data.extend_from_slice(&motion.meta_state.bits().to_le_bytes());
        data.extend_from_slice(&motion.button_state.to_le_bytes());
    }

    pub fn sign(&self, event: &VerifiedInputEvent) -> [u8; 32] {
        *blake3::keyed_hash(&self.key, &self.encode(event)).as_bytes()
    }

    /// Compares in constant time.
    pub fn verify(&self, event: &VerifiedInputEvent, hmac: &[u8; 32]) -> bool {
        blake3::keyed_hash(&self.key, &self.encode(event)) == blake3::Hash::from(*hmac)
    }
}
