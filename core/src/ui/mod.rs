pub mod progress;

pub use progress::{format_duration, human_bytes, outcome_label, BatchProgress};
