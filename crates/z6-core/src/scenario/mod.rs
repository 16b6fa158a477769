pub mod model;
pub mod validation;

pub use model::{
    Assertions, HttpMethod, HttpVersion, RequestSpec, RuntimeConfig, Scenario, Schedule,
    ScheduleKind, TargetConfig,
};
pub use validation::validate;
