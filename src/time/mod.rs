//! Time periods: anchored cycles, sliding deltas, static windows, cron
//! expressions and their intersections and unions.

pub mod anchored;
pub mod clock;
pub mod cron;
pub mod delta;
pub mod interval;
pub mod period;

pub use anchored::{
    AnchoredInterval, Scope, TimeOfDay, TimeOfHour, TimeOfMinute, TimeOfMonth, TimeOfSecond,
    TimeOfWeek, TimeOfYear,
};
pub use clock::{Clock, MockClock};
pub use cron::CronPeriod;
pub use delta::{StaticInterval, TimeDelta, TimeSpanDelta, format_duration, parse_duration};
pub use interval::{Closed, Interval, epsilon};
pub use period::TimePeriod;
