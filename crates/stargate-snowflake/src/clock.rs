use jiff::Timestamp;
use std::time::Duration;

pub trait Clock: Send + Sync {
    /// Returns the current time of the clock
    fn now(&self) -> Timestamp;
    /// Block and wait until the clock reaches the target time.
    fn wait_until(&self, target: Timestamp);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn wait_until(&self, target: Timestamp) {
        // Re-check after every sleep; the OS may wake us early.
        loop {
            let now = Timestamp::now();
            if now >= target {
                return;
            }
            let remaining_ms = (target.as_millisecond() - now.as_millisecond()).max(1) as u64;
            std::thread::sleep(Duration::from_millis(remaining_ms));
        }
    }
}
