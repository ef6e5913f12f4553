//! Injectable "adjusted now" (§9 design notes: global clock). Keeping the
//! wall clock behind a trait is what lets the future-timestamp rejection
//! in `ledger_consensus::check_header_contextual` stay deterministic under
//! test instead of racing `SystemTime::now()`.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now(&self) -> u32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub struct FixedClock(pub std::sync::atomic::AtomicU32);

#[cfg(test)]
impl FixedClock {
    pub fn new(t: u32) -> Self {
        Self(std::sync::atomic::AtomicU32::new(t))
    }

    pub fn set(&self, t: u32) {
        self.0.store(t, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> u32 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_what_it_was_set_to() {
        let c = FixedClock::new(1_700_000_000);
        assert_eq!(c.now(), 1_700_000_000);
        c.set(1_700_000_100);
        assert_eq!(c.now(), 1_700_000_100);
    }
}
