//! Duty timing: clocks and the persisted duty session.

pub mod clock;
pub mod duty;

pub use clock::{Clock, ManualClock, SystemClock};
pub use duty::{fallback_span, DutyTimer, DutyTimerState, FallbackRule, DUTY_CEILING_MINUTES};
