pub mod server_selection;
pub mod service;
pub mod sweeper;

pub use service::{CreateKeyRequest, KeyService};
