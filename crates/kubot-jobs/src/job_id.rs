use std::sync::atomic::{AtomicU32, Ordering};

use uuid::Uuid;

/// Length of a job identifier in lowercase hex characters.
pub const JOB_ID_LEN: usize = 8;

// Odd, so multiplication is a bijection on u32.
const SCATTER: u32 = 0x9E37_79B1;

/// Issues short job identifiers that never repeat within one sequence.
///
/// Each id is a sequence number scattered by an odd multiplier and XORed
/// with a per-sequence salt drawn from a v4 UUID. Both steps are bijections
/// on `u32`, so the first 2^32 ids are pairwise distinct while memory stays
/// constant.
#[derive(Debug)]
pub struct JobIdSequence {
    next: AtomicU32,
    salt: u32,
}

impl JobIdSequence {
    pub fn new() -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self::with_salt(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn with_salt(salt: u32) -> Self {
        Self {
            next: AtomicU32::new(0),
            salt,
        }
    }

    pub fn next_id(&self) -> String {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:08x}", sequence.wrapping_mul(SCATTER) ^ self.salt)
    }
}

impl Default for JobIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns true when `raw` has the shape of an identifier from [`JobIdSequence`].
pub fn is_valid_job_id(raw: &str) -> bool {
    raw.len() == JOB_ID_LEN
        && raw
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
}
