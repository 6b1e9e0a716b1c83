pub mod user;
pub mod movie;
pub mod theater;
pub mod showtime;
pub mod seat;
pub mod booking;
pub mod payment;

pub use user::{Role, User};
pub use movie::Movie;
pub use theater::{Screen, Theater};
pub use showtime::Showtime;
pub use seat::{Seat, SeatStatus, SeatType};
pub use booking::{Booking, BookingStatus};
pub use payment::{PaymentIntent, PaymentStatus};

/// Rounds a money amount to cents.
pub fn round2(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Two amounts are the same price if they agree to the cent.
pub fn same_amount(a: f64, b: f64) -> bool {
    (round2(a) - round2(b)).abs() < 0.005
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_keeps_cents() {
        assert_eq!(round2(10.005_f64 + 0.0001), 10.01);
        assert_eq!(round2(150.0 * 1.5), 225.0);
        assert_eq!(round2(0.1 + 0.2), 0.3);
    }

    #[test]
    fn same_amount_tolerates_float_noise() {
        assert!(same_amount(0.1 + 0.2, 0.3));
        assert!(!same_amount(300.0, 300.02));
    }
}
