use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Everything printed on a ticket.
#[derive(Debug, Clone)]
pub struct TicketData {
    pub booking_id: i64,
    pub booking_ref: String,
    pub customer: String,
    pub movie_title: String,
    pub theater_name: String,
    pub theater_location: String,
    pub screen_name: String,
    pub start_time: DateTime<Utc>,
    pub seats: Vec<String>,
    pub total_price: f64,
}

/// First 16 chars of base64url(SHA-256("ref:id:secret")).
pub fn verification_code(booking_ref: &str, booking_id: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", booking_ref, booking_id, secret).as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(hasher.finalize());
    encoded[..16].to_string()
}

pub fn file_name(booking_ref: &str) -> String {
    format!("ticket-{}.txt", booking_ref)
}

pub fn render(ticket: &TicketData, secret: &str) -> String {
    let mut out = String::new();
    let rule = "=".repeat(44);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "  CINEMA TICKET  {}", ticket.booking_ref);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Movie:    {}", ticket.movie_title);
    let _ = writeln!(out, "Theater:  {}, {}", ticket.theater_name, ticket.theater_location);
    let _ = writeln!(out, "Screen:   {}", ticket.screen_name);
    let _ = writeln!(out, "Time:     {}", ticket.start_time.format("%a %d %b %Y, %H:%M UTC"));
    let _ = writeln!(out, "Seats:    {}", ticket.seats.join(", "));
    let _ = writeln!(out, "Total:    {:.2}", ticket.total_price);
    let _ = writeln!(out, "Name:     {}", ticket.customer);
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "Verification code: {}",
        verification_code(&ticket.booking_ref, ticket.booking_id, secret)
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket() -> TicketData {
        TicketData {
            booking_id: 17,
            booking_ref: "BK-1A2B3C4D".into(),
            customer: "Arjun".into(),
            movie_title: "Jailer".into(),
            theater_name: "Sathyam".into(),
            theater_location: "Royapettah".into(),
            screen_name: "Screen 2".into(),
            start_time: Utc.with_ymd_and_hms(2030, 1, 5, 18, 30, 0).unwrap(),
            seats: vec!["C4".into(), "C5".into()],
            total_price: 300.0,
        }
    }

    #[test]
    fn code_is_stable_and_secret_dependent() {
        let a = verification_code("BK-1A2B3C4D", 17, "s1");
        assert_eq!(a.len(), 16);
        assert_eq!(a, verification_code("BK-1A2B3C4D", 17, "s1"));
        assert_ne!(a, verification_code("BK-1A2B3C4D", 17, "s2"));
        assert_ne!(a, verification_code("BK-1A2B3C4D", 18, "s1"));
    }

    #[test]
    fn rendered_ticket_lists_seats_and_code() {
        let text = render(&ticket(), "s1");
        assert!(text.contains("Seats:    C4, C5"));
        assert!(text.contains("Total:    300.00"));
        assert!(text.contains("Sat 05 Jan 2030, 18:30 UTC"));
        assert!(text.contains(&verification_code("BK-1A2B3C4D", 17, "s1")));
        assert_eq!(file_name("BK-1A2B3C4D"), "ticket-BK-1A2B3C4D.txt");
    }
}
