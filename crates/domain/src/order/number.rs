//! Date-scoped sequential order numbers, formatted `ORD-YYYYMMDD-NNNN`.
//!
//! The next number for a store is derived from the highest existing number
//! carrying today's prefix. The read-increment-write happens inside the
//! order-commit transaction; a unique index on `(store_id, order_number)`
//! backstops the sequence.

use chrono::NaiveDate;

/// Formats an order number for a date and sequence value.
pub fn format_order_number(date: NaiveDate, sequence: u32) -> String {
    format!("{}{sequence:04}", order_number_prefix(date))
}

/// The prefix shared by every order number of one day.
pub fn order_number_prefix(date: NaiveDate) -> String {
    format!("ORD-{}-", date.format("%Y%m%d"))
}

/// Derives the next order number from the highest existing number with
/// today's prefix. `None`, a stale-date number, or an unparseable suffix
/// all restart the sequence at 1.
pub fn next_order_number(highest: Option<&str>, date: NaiveDate) -> String {
    let prefix = order_number_prefix(date);
    let next = highest
        .and_then(|n| n.strip_prefix(&prefix))
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .map_or(1, |seq| seq + 1);
    format_order_number(date, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn formats_with_zero_padded_sequence() {
        assert_eq!(
            format_order_number(date(2024, 3, 7), 12),
            "ORD-20240307-0012"
        );
    }

    #[test]
    fn first_order_of_the_day() {
        assert_eq!(
            next_order_number(None, date(2024, 3, 7)),
            "ORD-20240307-0001"
        );
    }

    #[test]
    fn increments_the_highest_existing_number() {
        assert_eq!(
            next_order_number(Some("ORD-20240307-0041"), date(2024, 3, 7)),
            "ORD-20240307-0042"
        );
    }

    #[test]
    fn sequence_restarts_each_day() {
        assert_eq!(
            next_order_number(Some("ORD-20240306-0099"), date(2024, 3, 7)),
            "ORD-20240307-0001"
        );
    }

    #[test]
    fn sequence_grows_past_four_digits() {
        assert_eq!(
            next_order_number(Some("ORD-20240307-9999"), date(2024, 3, 7)),
            "ORD-20240307-10000"
        );
    }

    #[test]
    fn malformed_highest_restarts_the_sequence() {
        assert_eq!(
            next_order_number(Some("garbage"), date(2024, 3, 7)),
            "ORD-20240307-0001"
        );
    }
}
