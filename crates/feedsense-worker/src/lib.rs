//! feedsense worker
//!
//! Drains the `feedback` table: a [`Scheduler`] runs one bootstrap sweep, then waits on
//! either a LISTEN/NOTIFY wake-up or a timeout before every further [`SweepExecutor::sweep`].
//! Any number of schedulers may run against the same table; claims are disjoint.

pub mod listener;
pub mod scheduler;
pub mod sweep;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use listener::{NotificationSource, PgEventListener, PgSubscriber, Subscriber};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use sweep::SweepExecutor;
