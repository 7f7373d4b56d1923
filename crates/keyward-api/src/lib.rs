//! keyward-api
//!
//! JSON-RPC 2.0 facade for the chat front end.
//!
//! Namespace: "keyward"
//! Methods:
//!   keyward_authenticateUser   — create-on-first-sight, banned/admin flags
//!   keyward_createTestKey      — trial key issuance
//!   keyward_createPaidPayment  — open a payment-provider intent
//!   keyward_cancelPayment      — cancel a still-pending payment
//!   keyward_listUserKeys       — list a user's keys
//!   keyward_prolongKey         — open an intent to extend an existing key

pub mod api;
pub mod server;
pub mod types;

pub use api::KeywardApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::{RpcKey, RpcPayment, RpcUser};
