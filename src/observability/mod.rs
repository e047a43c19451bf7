//! Observability: structured logging, lifecycle events and counters
//!
//! Observability never changes engine behavior; a failed log write is
//! swallowed.
//!
//! ```ignore
//! use lix::observability::{Logger, Event, log_event_with_fields};
//!
//! Logger::info("QUERY_EXECUTED", &[("rows", "42")]);
//! log_event_with_fields(Event::CommitCreated, &[("commit_id", id)]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

#[cfg(test)]
pub(crate) use logger::capture_log;

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}
