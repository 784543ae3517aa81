pub mod clock;
pub mod config;
pub mod config_parser;
pub mod dead_letter;
pub mod domain;
pub mod error;
pub mod kafka;
pub mod listener;
pub mod metrics;
pub mod outbox;
pub mod retry;
pub mod saga;
pub mod seat_lock;
pub mod shutdown;

pub use clock::*;
pub use crate::config::*;
pub use config_parser::*;
pub use dead_letter::*;
pub use domain::*;
pub use error::*;
pub use kafka::*;
pub use listener::*;
pub use metrics::*;
pub use outbox::*;
pub use retry::*;
pub use saga::*;
pub use seat_lock::*;
pub use shutdown::*;
