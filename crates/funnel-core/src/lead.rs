//! Lead Capture
//!
//! Raw form input, its validated form, and the consent evidence attached to
//! every registration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Field, FieldErrors, ValidationError};
use crate::phone::PhoneNumber;

/// Privacy policy version accepted by default
pub const DEFAULT_POLICY_VERSION: &str = "v1.0";

/// Default lead source when the form does not say
pub const DEFAULT_SOURCE: &str = "web-form";

/// Identifier assigned by the remote registration service
///
/// This is the only stable join key between local checkout state and the
/// remote subscriber record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Wrap a remote identifier; blank values are not identifiers
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zodiac signs offered by the form
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZodiacSign {
    Aries,
    Tauro,
    #[serde(rename = "Géminis")]
    Geminis,
    #[serde(rename = "Cáncer")]
    Cancer,
    Leo,
    Virgo,
    Libra,
    Escorpio,
    Sagitario,
    Capricornio,
    Acuario,
    Piscis,
}

impl ZodiacSign {
    pub const ALL: [ZodiacSign; 12] = [
        ZodiacSign::Aries,
        ZodiacSign::Tauro,
        ZodiacSign::Geminis,
        ZodiacSign::Cancer,
        ZodiacSign::Leo,
        ZodiacSign::Virgo,
        ZodiacSign::Libra,
        ZodiacSign::Escorpio,
        ZodiacSign::Sagitario,
        ZodiacSign::Capricornio,
        ZodiacSign::Acuario,
        ZodiacSign::Piscis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZodiacSign::Aries => "Aries",
            ZodiacSign::Tauro => "Tauro",
            ZodiacSign::Geminis => "Géminis",
            ZodiacSign::Cancer => "Cáncer",
            ZodiacSign::Leo => "Leo",
            ZodiacSign::Virgo => "Virgo",
            ZodiacSign::Libra => "Libra",
            ZodiacSign::Escorpio => "Escorpio",
            ZodiacSign::Sagitario => "Sagitario",
            ZodiacSign::Capricornio => "Capricornio",
            ZodiacSign::Acuario => "Acuario",
            ZodiacSign::Piscis => "Piscis",
        }
    }
}

impl FromStr for ZodiacSign {
    type Err = ValidationError;

    /// Case-insensitive; accents are optional (`geminis` matches `Géminis`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = fold(s);
        ZodiacSign::ALL
            .into_iter()
            .find(|sign| fold(sign.as_str()) == wanted)
            .ok_or_else(|| ValidationError::new(Field::Sign, "Seleccioná un signo válido."))
    }
}

impl fmt::Display for ZodiacSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of daily content the subscriber wants
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPreference {
    Amor,
    Carrera,
    Bienestar,
    Todo,
    #[default]
    General,
}

impl ContentPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentPreference::Amor => "amor",
            ContentPreference::Carrera => "carrera",
            ContentPreference::Bienestar => "bienestar",
            ContentPreference::Todo => "todo",
            ContentPreference::General => "general",
        }
    }
}

impl FromStr for ContentPreference {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "amor" => Ok(ContentPreference::Amor),
            "carrera" => Ok(ContentPreference::Carrera),
            "bienestar" => Ok(ContentPreference::Bienestar),
            "todo" => Ok(ContentPreference::Todo),
            "general" => Ok(ContentPreference::General),
            _ => Err(ValidationError::new(
                Field::ContentPreference,
                "Elegí el contenido que preferís.",
            )),
        }
    }
}

impl fmt::Display for ContentPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw input as typed into the lead form
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LeadForm {
    #[serde(rename = "nombre", default)]
    pub name: String,

    #[serde(rename = "signo", default)]
    pub sign: String,

    #[serde(rename = "contenido_preferido", default)]
    pub content: String,

    /// Phone in the local form `09XXXXXXX`
    #[serde(rename = "telefono", default)]
    pub phone: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(rename = "acepto_politicas", default)]
    pub consent: bool,

    #[serde(rename = "version_politica", default)]
    pub policy_version: Option<String>,

    #[serde(rename = "fuente", default)]
    pub source: Option<String>,
}

impl LeadForm {
    /// Validate every field, reporting one message per rejected field
    ///
    /// Consent is checked last so that the form shows data errors first.
    pub fn validate(&self) -> Result<Lead, FieldErrors> {
        let mut errors = FieldErrors::new();

        let name = self.name.trim();
        if name.is_empty() {
            errors.push(ValidationError::new(Field::Name, "Completá tu nombre."));
        }

        let sign = if self.sign.trim().is_empty() {
            errors.push(ValidationError::new(Field::Sign, "Seleccioná tu signo."));
            None
        } else {
            self.sign.parse::<ZodiacSign>().map_err(|e| errors.push(e)).ok()
        };

        let content = if self.content.trim().is_empty() {
            errors.push(ValidationError::new(
                Field::ContentPreference,
                "Elegí el contenido que preferís.",
            ));
            None
        } else {
            self.content
                .parse::<ContentPreference>()
                .map_err(|e| errors.push(e))
                .ok()
        };

        let phone = if self.phone.trim().is_empty() {
            errors.push(ValidationError::new(
                Field::Phone,
                "Completá tu número de WhatsApp.",
            ));
            None
        } else {
            PhoneNumber::normalize(&self.phone)
                .map_err(|e| errors.push(e))
                .ok()
        };

        if !self.consent {
            errors.push(ValidationError::new(
                Field::Consent,
                "Debés aceptar la Política de Privacidad.",
            ));
        }

        match (sign, content, phone) {
            (Some(sign), Some(content), Some(phone)) if errors.is_empty() => Ok(Lead {
                name: name.to_string(),
                sign,
                content,
                phone,
                email: self
                    .email
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string),
                policy_version: self
                    .policy_version
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_POLICY_VERSION.to_string()),
                source: self
                    .source
                    .clone()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            }),
            _ => Err(errors),
        }
    }
}

/// A lead that passed validation and explicitly consented
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub sign: ZodiacSign,
    pub content: ContentPreference,
    pub phone: PhoneNumber,
    pub email: Option<String>,
    pub policy_version: String,
    pub source: String,
}

/// Evidence of consent captured by the server at registration time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentMetadata {
    /// When the consent reached the server
    pub accepted_at: DateTime<Utc>,

    /// Caller IP as seen by the server
    pub ip: String,

    /// Normalized user-agent descriptor, e.g. `Chrome 141.0 (Windows 10)`
    pub user_agent: String,

    /// How consent was collected (`web-form`, `web-checkout`)
    pub medium: String,
}

fn fold(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            other => other,
        })
        .collect()
}
