pub mod outbox;
pub mod schemas;
pub mod seat;
pub mod ticket;
pub mod venue;

pub use outbox::*;
pub use schemas::*;
pub use seat::*;
pub use ticket::*;
pub use venue::*;
