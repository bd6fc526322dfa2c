//! Field validation shared by the write endpoints.
//!
//! Errors are collected per field so a single response reports every
//! problem with the submitted payload.

use rust_decimal::Decimal;

use crate::errors::{ApiError, FieldErrors};

pub const TITLE_MAX_CHARS: usize = 120;
pub const CATEGORY_MAX_CHARS: usize = 60;
pub const PHONE_MAX_CHARS: usize = 15;
pub const NAME_MAX_CHARS: usize = 150;
pub const HOSTEL_BLOCK_MAX_CHARS: usize = 100;

const MONEY_MAX_DIGITS: u32 = 10;
const MONEY_DECIMAL_PLACES: u32 = 2;

#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn required_text(&mut self, field: &str, value: &str, max_chars: usize) {
        if value.trim().is_empty() {
            self.add(field, "This field may not be blank.");
        } else {
            self.max_length(field, value, max_chars);
        }
    }

    pub fn max_length(&mut self, field: &str, value: &str, max_chars: usize) {
        if value.chars().count() > max_chars {
            self.add(field, format!("Ensure this field has no more than {} characters.", max_chars));
        }
    }

    pub fn money(&mut self, field: &str, value: &Decimal) {
        if let Err(message) = check_money(value) {
            self.add(field, message);
        }
    }

    pub fn price_band(&mut self, min_price: Option<&Decimal>, max_price: Option<&Decimal>) {
        if let (Some(min), Some(max)) = (min_price, max_price) {
            if min > max {
                self.add("min_price", "min_price cannot be greater than max_price.");
            }
        }
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Fields(self.errors))
        }
    }
}

/// Checks a `NUMERIC(10, 2)` amount: non-negative, at most two decimal
/// places and ten digits in total.
pub fn check_money(value: &Decimal) -> Result<(), String> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err("Ensure this value is greater than or equal to 0.".to_string());
    }
    let normalized = value.normalize();
    if normalized.scale() > MONEY_DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {} decimal places.",
            MONEY_DECIMAL_PLACES
        ));
    }
    let limit = Decimal::from(10_i64.pow(MONEY_MAX_DIGITS - MONEY_DECIMAL_PLACES));
    if normalized.trunc() >= limit {
        return Err(format!(
            "Ensure that there are no more than {} digits in total.",
            MONEY_MAX_DIGITS
        ));
    }
    Ok(())
}

/// Rescales an already validated amount to the stored two decimal places.
pub fn to_money(value: Decimal) -> Decimal {
    let mut value = value.round_dp(MONEY_DECIMAL_PLACES);
    value.rescale(MONEY_DECIMAL_PLACES);
    value
}

/// Lowercases and trims an email, rejecting anything that is not `local@domain.tld`.
pub fn normalize_email(email: &str) -> Result<String, String> {
    let email = email.trim().to_lowercase();
    let invalid = || "Enter a valid email address.".to_string();
    if email.is_empty() {
        return Err("This field may not be blank.".to_string());
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn money_rules() {
        assert!(check_money(&dec("0")).is_ok());
        assert!(check_money(&dec("25000.50")).is_ok());
        assert!(check_money(&dec("12.500")).is_ok());
        assert!(check_money(&dec("99999999.99")).is_ok());
        assert!(check_money(&dec("-1")).is_err());
        assert!(check_money(&dec("1.999")).is_err());
        assert!(check_money(&dec("100000000")).is_err());
    }

    #[test]
    fn to_money_uses_two_places() {
        assert_eq!(to_money(dec("25000")).to_string(), "25000.00");
        assert_eq!(to_money(dec("12.5")).to_string(), "12.50");
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  Asha@IITB.AC.IN ").unwrap(), "asha@iitb.ac.in");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("a@b").is_err());
        assert!(normalize_email("a@@b.com").is_err());
        assert!(normalize_email("a b@c.com").is_err());
        assert!(normalize_email("").is_err());
    }

    #[test]
    fn validator_collects_per_field() {
        let mut v = Validator::new();
        v.required_text("title", "  ", TITLE_MAX_CHARS);
        v.money("price", &dec("-5"));
        v.price_band(Some(&dec("30")), Some(&dec("20")));
        match v.finish() {
            Err(ApiError::Fields(errors)) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.contains_key("title"));
                assert!(errors.contains_key("price"));
                assert!(errors.contains_key("min_price"));
            }
            other => panic!("expected field errors, got {:?}", other),
        }
    }

    #[test]
    fn long_titles_rejected() {
        let mut v = Validator::new();
        v.required_text("title", &"x".repeat(121), TITLE_MAX_CHARS);
        assert!(v.finish().is_err());

        let mut v = Validator::new();
        v.required_text("title", &"x".repeat(120), TITLE_MAX_CHARS);
        assert!(v.finish().is_ok());
    }
}
