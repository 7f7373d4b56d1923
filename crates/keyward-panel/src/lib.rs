pub mod client;
pub mod endpoint;
pub mod types;

pub use client::PanelClient;
pub use endpoint::PanelEndpoint;
