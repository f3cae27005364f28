mod clock;
mod presentation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use presentation::{delay_to_next_minute, PresentationTimer, TimerArm, TimerPhase, TimerTick};
