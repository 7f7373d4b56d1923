pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod model;

pub use clock::Clock;
pub use config::Settings;
pub use error::{CoreError, CoreResult};
pub use model::*;
