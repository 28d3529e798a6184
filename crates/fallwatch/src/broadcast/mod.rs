//! Job lifecycle events for in-process subscribers.

pub mod job_events;

pub use job_events::{JobEvent, JobEventBroadcaster, JobEventKind, DEFAULT_EVENT_CAPACITY};
