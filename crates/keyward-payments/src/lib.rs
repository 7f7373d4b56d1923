pub mod intake;
pub mod provider;
pub mod state_machine;

pub use provider::PaymentProviderClient;
pub use state_machine::PaymentService;
