pub mod consumer;

pub use consumer::{parse_report, process_message, Consumer, Outcome};
