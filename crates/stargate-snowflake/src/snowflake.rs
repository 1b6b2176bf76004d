use crate::{
    clock::{Clock, SystemClock},
    error::Error,
    IdGenerator, SnowflakeId,
};
use jiff::{SignedDuration, Timestamp};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;
use typed_builder::TypedBuilder;

const MAX_TIMESTAMP_MILLIS: i64 = (1_i64 << 41) - 1;
const MAX_NODE_ID: u16 = (1 << 10) - 1;
const MAX_SEQUENCE: u16 = (1 << 12) - 1;

/// 2010-11-04T01:42:54.657Z, the epoch popularised by Twitter's Snowflake.
pub const DEFAULT_EPOCH: Timestamp = Timestamp::constant(1_288_834_974, 657_000_000);

/// Configures a Snowflake generator instance.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct SnowflakeSettings {
    /// A unique node index in the range `[0, 1023]`.
    #[builder]
    pub node_id: u16,
    /// Zero point of the 41-bit millisecond timestamp field.
    #[builder(default = DEFAULT_EPOCH)]
    pub start_epoch: Timestamp,
    /// Largest backwards clock jump the generator waits out. Bigger jumps
    /// fail with [`Error::ClockMovedBackwards`].
    #[builder(default = Duration::from_millis(10))]
    pub max_rollback: Duration,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: Option<Timestamp>,
    sequence: u16,
}

/// Snowflake ID generator: node ID, millisecond timestamp and a
/// per-millisecond sequence packed into 63 bits.
pub struct Snowflake<C: Clock> {
    start_time: Timestamp,
    node_id: u16,
    max_rollback_ms: i64,
    clock: C,
    state: Mutex<GeneratorState>,
}

impl Snowflake<SystemClock> {
    /// Creates a generator backed by the real system clock.
    pub fn new(settings: SnowflakeSettings) -> Result<Self, Error> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> Snowflake<C> {
    pub fn with_clock(settings: SnowflakeSettings, clock: C) -> Result<Self, Error> {
        if settings.node_id > MAX_NODE_ID {
            return Err(Error::InvalidNodeId {
                node_id: settings.node_id,
                max_node_id: MAX_NODE_ID,
            });
        }

        let now = clock.now();
        if settings.start_epoch > now {
            return Err(Error::EpochAhead {
                epoch: settings.start_epoch,
                now,
            });
        }

        Ok(Self {
            start_time: settings.start_epoch,
            node_id: settings.node_id,
            max_rollback_ms: i64::try_from(settings.max_rollback.as_millis()).unwrap_or(i64::MAX),
            clock,
            state: Mutex::new(GeneratorState::default()),
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Generates the next unique SnowflakeId.
    ///
    /// - if the per-millisecond sequence is exhausted, wait for the next millisecond
    /// - if the clock moves backward within `max_rollback`, wait until it catches up
    /// - if it moves back further, fail instead of risking a duplicate
    pub fn next_snowflake(&self) -> Result<SnowflakeId, Error> {
        let mut state = self.state.lock().map_err(|_| Error::StatePoisoned)?;

        let mut now = self.clock.now();

        match state.last_timestamp {
            None => {
                state.sequence = 0;
            }
            Some(last) => {
                if now.as_millisecond() < last.as_millisecond() {
                    let drift_ms = last.as_millisecond() - now.as_millisecond();
                    if drift_ms > self.max_rollback_ms {
                        warn!(drift_ms, node_id = self.node_id, "clock moved backwards");
                        return Err(Error::ClockMovedBackwards {
                            last,
                            now,
                            drift_ms,
                        });
                    }
                    self.clock.wait_until(last);
                    now = self.clock.now();
                }

                if now.as_millisecond() == last.as_millisecond() {
                    if state.sequence < MAX_SEQUENCE {
                        state.sequence += 1;
                    } else {
                        let next_ms = last + SignedDuration::from_millis(1);
                        self.clock.wait_until(next_ms);
                        now = self.clock.now();
                        state.sequence = 0;
                    }
                } else {
                    state.sequence = 0;
                }
            }
        }

        let elapsed = now.as_millisecond() - self.start_time.as_millisecond();
        if elapsed > MAX_TIMESTAMP_MILLIS {
            return Err(Error::OverTimeLimit);
        }

        let id = SnowflakeId::new()
            .with_timestamp(elapsed as u64)
            .with_node_id(self.node_id)
            .with_sequence(state.sequence);

        state.last_timestamp = Some(now);

        Ok(id)
    }
}

impl<C: Clock + 'static> IdGenerator for Snowflake<C> {
    fn next_id(&self) -> Result<i64, Error> {
        self.next_snowflake().map(|id| id.as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock::TestClock;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn settings(node_id: u16) -> SnowflakeSettings {
        SnowflakeSettings::builder()
            .node_id(node_id)
            .start_epoch(Timestamp::from_millisecond(0).unwrap())
            .build()
    }

    fn make_generator(node_id: u16, clock_ms: i64) -> (Snowflake<TestClock>, TestClock) {
        let clock = TestClock::at_millis(clock_ms);
        let gen = Snowflake::with_clock(settings(node_id), clock.clone()).unwrap();
        (gen, clock)
    }

    #[test]
    fn first_id_has_sequence_zero() {
        let (gen, _) = make_generator(0, 100);
        let id = gen.next_snowflake().unwrap();
        assert_eq!(id.sequence(), 0);
        assert_eq!(id.timestamp(), 100);
    }

    #[test]
    fn same_millisecond_increments_sequence() {
        let (gen, _) = make_generator(0, 100);
        let ids: Vec<_> = (0..3).map(|_| gen.next_snowflake().unwrap()).collect();
        assert_eq!(
            ids.iter().map(|id| id.sequence()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn sequence_overflow_advances_clock() {
        let (gen, _) = make_generator(0, 100);
        for _ in 0..=MAX_SEQUENCE {
            gen.next_snowflake().unwrap();
        }
        let id = gen.next_snowflake().unwrap();
        assert_eq!(id.sequence(), 0);
        assert_eq!(id.timestamp(), 101);
    }

    #[test]
    fn node_id_is_embedded() {
        let (gen, _) = make_generator(1023, 100);
        let id = gen.next_snowflake().unwrap();
        assert_eq!(id.node_id(), 1023);
    }

    #[test]
    fn invalid_node_id_is_rejected() {
        let clock = TestClock::at_millis(100);
        let err = Snowflake::with_clock(settings(1024), clock).err().unwrap();
        assert_eq!(
            err,
            Error::InvalidNodeId {
                node_id: 1024,
                max_node_id: 1023
            }
        );
    }

    #[test]
    fn epoch_in_the_future_is_rejected() {
        let clock = TestClock::at_millis(100);
        let settings = SnowflakeSettings::builder()
            .node_id(1)
            .start_epoch(Timestamp::from_millisecond(200).unwrap())
            .build();
        assert!(matches!(
            Snowflake::with_clock(settings, clock),
            Err(Error::EpochAhead { .. })
        ));
    }

    #[test]
    fn small_rollback_waits_for_the_clock() {
        let (gen, clock) = make_generator(0, 1_000);
        let first = gen.next_snowflake().unwrap();
        clock.shift_millis(-5);
        let second = gen.next_snowflake().unwrap();
        assert!(second.as_i64() > first.as_i64());
        assert_eq!(second.timestamp(), 1_000);
        assert_eq!(second.sequence(), 1);
    }

    #[test]
    fn large_rollback_fails_loudly() {
        let (gen, clock) = make_generator(0, 1_000);
        gen.next_snowflake().unwrap();
        clock.shift_millis(-500);
        assert!(matches!(
            gen.next_snowflake(),
            Err(Error::ClockMovedBackwards { drift_ms: 500, .. })
        ));
    }

    #[test]
    fn overtime_limit_returns_error() {
        let (gen, _) = make_generator(0, MAX_TIMESTAMP_MILLIS + 1);
        assert_eq!(gen.next_snowflake(), Err(Error::OverTimeLimit));
    }

    #[test]
    fn generator_instances_are_independent() {
        let (a, _) = make_generator(1, 100);
        let (b, _) = make_generator(2, 100);
        let id_a = a.next_id().unwrap();
        let id_b = b.next_id().unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(SnowflakeId::from_i64(id_a).node_id(), 1);
        assert_eq!(SnowflakeId::from_i64(id_b).node_id(), 2);
    }

    #[test]
    fn concurrent_ids_are_unique_and_increasing_per_thread() {
        let gen = Arc::new(Snowflake::new(SnowflakeSettings::builder().node_id(7).build()).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                std::thread::spawn(move || {
                    let ids: Vec<i64> = (0..5_000).map(|_| gen.next_id().unwrap()).collect();
                    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 20_000);
    }
}
