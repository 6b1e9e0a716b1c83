pub mod auth;
pub mod cleanup;
pub mod payment;
pub mod seat_layout;
pub mod seat_lock;
pub mod tickets;
