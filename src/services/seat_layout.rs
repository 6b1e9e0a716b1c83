//! Seat map generation for new showtimes.

use crate::models::{round2, Screen, SeatType};

/// A seat to be inserted for a showtime.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatSpec {
    pub seat_number: String,
    pub row: String,
    pub col: i32,
    pub seat_type: SeatType,
    pub price: f64,
}

/// Spreadsheet-style row label: 0 -> A, 25 -> Z, 26 -> AA.
pub fn row_label(index: u32) -> String {
    let mut n = index + 1;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

/// Layout used when a theater has no screen configured under the requested name.
pub fn default_screen(name: &str) -> Screen {
    Screen {
        name: name.to_string(),
        rows: 10,
        cols: 12,
        premium_rows: vec!["I".into(), "J".into()],
        vip_rows: vec![],
    }
}

pub fn seat_type_for(screen: &Screen, row: &str) -> SeatType {
    let listed = |rows: &[String]| rows.iter().any(|r| r.eq_ignore_ascii_case(row));
    if listed(&screen.vip_rows) {
        SeatType::Vip
    } else if listed(&screen.premium_rows) {
        SeatType::Premium
    } else {
        SeatType::Standard
    }
}

pub fn price_for(seat_type: SeatType, base_price: f64) -> f64 {
    round2(base_price * seat_type.multiplier())
}

pub fn generate(screen: &Screen, base_price: f64) -> Vec<SeatSpec> {
    let mut seats = Vec::with_capacity(screen.capacity() as usize);
    for r in 0..screen.rows {
        let row = row_label(r);
        let seat_type = seat_type_for(screen, &row);
        let price = price_for(seat_type, base_price);
        for c in 1..=screen.cols {
            seats.push(SeatSpec {
                seat_number: format!("{}{}", row, c),
                row: row.clone(),
                col: c as i32,
                seat_type,
                price,
            });
        }
    }
    seats
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn row_labels_roll_over() {
        assert_eq!(row_label(0), "A");
        assert_eq!(row_label(25), "Z");
        assert_eq!(row_label(26), "AA");
        assert_eq!(row_label(27), "AB");
        assert_eq!(row_label(51), "AZ");
        assert_eq!(row_label(52), "BA");
    }

    #[test]
    fn default_screen_has_premium_back_rows() {
        let seats = generate(&default_screen("Screen 1"), 150.0);
        assert_eq!(seats.len(), 120);
        assert_eq!(seats[0].seat_number, "A1");
        assert_eq!(seats[0].seat_type, SeatType::Standard);
        assert_eq!(seats[0].price, 150.0);

        let back = seats.iter().find(|s| s.seat_number == "J12").unwrap();
        assert_eq!(back.seat_type, SeatType::Premium);
        assert_eq!(back.price, 225.0);
    }

    #[test]
    fn vip_wins_over_premium() {
        let screen = Screen {
            name: "Gold".into(),
            rows: 3,
            cols: 4,
            premium_rows: vec!["C".into()],
            vip_rows: vec!["c".into()],
        };
        let seats = generate(&screen, 99.99);
        let c1 = seats.iter().find(|s| s.seat_number == "C1").unwrap();
        assert_eq!(c1.seat_type, SeatType::Vip);
        assert_eq!(c1.price, 199.98);
    }

    proptest! {
        #[test]
        fn layout_invariants(rows in 1u32..=26, cols in 1u32..=40, base in 1.0f64..2000.0) {
            let screen = Screen {
                name: "P".into(),
                rows,
                cols,
                premium_rows: vec![row_label(rows - 1)],
                vip_rows: vec![],
            };
            let seats = generate(&screen, base);
            prop_assert_eq!(seats.len() as u32, rows * cols);

            let unique: HashSet<&str> = seats.iter().map(|s| s.seat_number.as_str()).collect();
            prop_assert_eq!(unique.len(), seats.len());

            prop_assert!(seats.iter().all(|s| s.price > 0.0));
            prop_assert!(seats.iter().all(|s| s.col >= 1 && s.col as u32 <= cols));
        }
    }
}
