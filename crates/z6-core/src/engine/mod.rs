pub mod executor;
pub mod virtual_user;

pub use executor::{run_scenario, RunOutcome, SHUTDOWN_GRACE_TICKS, TICKS_PER_SECOND};
pub use virtual_user::{select_request, VuContext, DEFAULT_THINK_TIME_TICKS};
