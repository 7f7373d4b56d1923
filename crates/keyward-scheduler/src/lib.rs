mod host;

pub use host::SchedulerHost;
