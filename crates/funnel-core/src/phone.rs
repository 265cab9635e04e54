//! Uruguayan Mobile Numbers
//!
//! Users type their WhatsApp number the way it is dialled locally
//! (`099 123 456`). The funnel needs the subscriber number without the trunk
//! zero for the registration record and the E.164 form for WhatsApp delivery.
//!
//! Only one entry rule is accepted: `09` followed by seven digits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Field, ValidationError};

/// Uruguay's country calling code
pub const COUNTRY_CODE: &str = "598";

/// ISO country code sent with every registration
pub const COUNTRY: &str = "UY";

const LOCAL_LEN: usize = 9;
const NATIONAL_LEN: usize = 8;

const INVALID_MESSAGE: &str = "El número debe comenzar con 09 y tener 9 dígitos (ej: 099123456).";

/// A validated Uruguayan mobile number
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber {
    /// Subscriber digits without the trunk zero, always `9XXXXXXX`
    national: String,
}

impl PhoneNumber {
    /// Normalize a number typed in the local form `09XXXXXXX`
    ///
    /// Non-digit characters (spaces, dashes, parentheses) are ignored.
    pub fn normalize(input: &str) -> Result<Self, ValidationError> {
        let digits = digits_of(input);
        if digits.len() != LOCAL_LEN || !digits.starts_with("09") {
            return Err(ValidationError::new(Field::Phone, INVALID_MESSAGE));
        }

        Ok(Self {
            national: digits[1..].to_string(),
        })
    }

    /// Parse an E.164 number (`+598` followed by the national digits)
    pub fn from_e164(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let digits = digits_of(trimmed);
        if !trimmed.starts_with('+') {
            return Err(ValidationError::new(Field::Phone, INVALID_MESSAGE));
        }

        match digits.strip_prefix(COUNTRY_CODE) {
            Some(national) => Self::from_national(national),
            None => Err(ValidationError::new(Field::Phone, INVALID_MESSAGE)),
        }
    }

    /// Accept any of the three forms: local, national or E.164 (with or
    /// without the leading `+`)
    pub fn parse_any(input: &str) -> Result<Self, ValidationError> {
        let digits = digits_of(input);

        if digits.len() == LOCAL_LEN && digits.starts_with("09") {
            return Self::normalize(&digits);
        }
        if digits.len() == NATIONAL_LEN {
            return Self::from_national(&digits);
        }
        match digits.strip_prefix(COUNTRY_CODE) {
            Some(national) => Self::from_national(national),
            None => Err(ValidationError::new(Field::Phone, INVALID_MESSAGE)),
        }
    }

    fn from_national(national: &str) -> Result<Self, ValidationError> {
        if national.len() != NATIONAL_LEN || !national.starts_with('9') {
            return Err(ValidationError::new(Field::Phone, INVALID_MESSAGE));
        }

        Ok(Self {
            national: national.to_string(),
        })
    }

    /// Number as dialled locally, trunk zero included (`099123456`)
    pub fn local(&self) -> String {
        format!("0{}", self.national)
    }

    /// Subscriber digits without the trunk zero (`99123456`)
    pub fn national(&self) -> &str {
        &self.national
    }

    /// International form used for WhatsApp (`+59899123456`)
    pub fn e164(&self) -> String {
        format!("+{COUNTRY_CODE}{}", self.national)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.e164())
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_any(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.e164()
    }
}

fn digits_of(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}
