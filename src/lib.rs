//! Scambait — an autoresponder that wastes scammers' time.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod mail;
pub mod persona;
pub mod poller;
pub mod session;
pub mod store;
pub mod thread;
