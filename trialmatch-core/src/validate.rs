//! Contact form field validation.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ContactForm, ContactRecord};

pub const PHONE_MIN_DIGITS: usize = 10;
pub const PHONE_MAX_DIGITS: usize = 15;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"))
}

/// `local@domain.tld` shape with no whitespace inside. Surrounding whitespace is ignored.
pub fn is_valid_email(input: &str) -> bool {
    email_re().is_match(input.trim())
}

pub fn normalize_phone(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn is_valid_phone(input: &str) -> bool {
    let digits = normalize_phone(input).len();
    (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
}

/// Per-field messages for a rejected submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFieldErrors {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactFieldErrors {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none()
    }

    pub fn messages(&self) -> Vec<String> {
        self.email.iter().chain(self.phone.iter()).cloned().collect()
    }
}

impl std::fmt::Display for ContactFieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.messages().join(" "))
    }
}

/// Validate a form submission atomically: either every field passes and a
/// [`ContactRecord`] is built, or all field errors are returned together.
pub fn validate_contact_form(form: &ContactForm) -> Result<ContactRecord, ContactFieldErrors> {
    let mut errors = ContactFieldErrors::default();

    if !is_valid_email(&form.email) {
        errors.email = Some("Please enter a valid email.".to_string());
    }
    if !is_valid_phone(&form.phone) {
        errors.phone = Some(format!(
            "Please enter a valid phone number ({PHONE_MIN_DIGITS}–{PHONE_MAX_DIGITS} digits)."
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ContactRecord {
        email: form.email.trim().to_string(),
        phone: normalize_phone(&form.phone),
        raw_phone: form.phone.clone(),
        consent: form.consent,
    })
}
