mod clock;
pub mod error;
mod generator;
mod snowflake;
mod snowflake_id;

pub use clock::{Clock, SystemClock};
pub use error::Error;
pub use generator::IdGenerator;
pub use snowflake::{Snowflake, SnowflakeSettings};
pub use snowflake_id::SnowflakeId;
