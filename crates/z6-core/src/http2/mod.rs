pub mod engine;
pub mod frame;
pub mod hpack;

pub use engine::{Http2Engine, MAX_CONCURRENT_STREAMS, STREAM_BODY_CAP};
pub use frame::{parse_frame, Frame, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};
