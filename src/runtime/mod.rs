/// Background runtime services
///
/// Work that runs outside the request cycle:
/// - Appointment reminder sweeps on a cron schedule (tokio-cron-scheduler)

pub mod scheduler;

pub use scheduler::ReminderScheduler;
