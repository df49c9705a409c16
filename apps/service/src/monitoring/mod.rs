/// Monitoring engine module - schedules and executes monitor checks
///
/// This module is responsible for:
/// - Claiming due monitors and enqueuing check jobs
/// - Executing HTTP, keyword, port, DNS, ping, heartbeat and domain/SSL checks
/// - Normalizing every protocol into a single check outcome
pub mod checker;
pub mod dns;
pub mod domain_ssl;
pub mod executor;
pub mod heartbeat;
pub mod http;
pub mod ping;
pub mod port;
pub mod scheduler;
pub mod types;
pub mod whois;

pub use checker::Checker;
pub use executor::MonitoringExecutor;
pub use scheduler::MonitoringScheduler;
pub use types::CheckOutcome;
