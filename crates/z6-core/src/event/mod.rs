pub mod file;
pub mod log;
pub mod record;

pub use file::{read_log, read_log_file, write_log, write_log_file, LogHeader, LOG_MAGIC, LOG_VERSION};
pub use log::{EventLog, MAX_EVENTS};
pub use record::{
    AssertionPayload, ConnEstablishedPayload, ErrorPayload, Event, EventType,
    RequestIssuedPayload, ResponseReceivedPayload, SchedulerTickPayload, EVENT_SIZE, PAYLOAD_SIZE,
};
