use serde::{Deserialize, Serialize};

/// Raw three-field submission from the contact form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub consent: bool,
}

/// Validated contact details. Only `validate::validate_contact_form` builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub email: String,
    /// Digits only.
    pub phone: String,
    /// As typed by the participant.
    pub raw_phone: String,
    pub consent: bool,
}

impl ContactRecord {
    /// Text of the hidden user turn that hands the contact data to the reasoning service.
    pub fn to_service_text(&self) -> String {
        format!(
            "Here is my contact information from the form:\nEmail: {}\nPhone: {}\nConsent: {}",
            self.email, self.phone, self.consent
        )
    }

    /// Read-only rendering used for the contact-snapshot turn.
    pub fn to_snapshot_text(&self) -> String {
        let consent = if self.consent { "yes" } else { "no" };
        format!(
            "**Submitted contact details**\nEmail: {}\nPhone: {}\nConsent to be contacted: {consent}",
            self.email, self.raw_phone
        )
    }
}
