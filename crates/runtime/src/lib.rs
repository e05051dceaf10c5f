pub mod budget;
pub mod event_queue;
pub mod metrics;

pub use budget::*;
pub use event_queue::*;
pub use metrics::*;
