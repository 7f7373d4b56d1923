pub mod message;
pub mod sink;
pub mod telegram;

pub use message::{render, Message};
pub use sink::MessagingSink;
pub use telegram::TelegramSink;
