pub mod bus;
pub mod sink;
pub mod types;

pub use bus::EventBus;
pub use sink::{CollectingSink, EventSink, NdjsonSink};
pub use types::Event;
