//! Pulls claim fields out of uploaded documents.
//!
//! Only text embedded in the upload is read (plain text, text layers of PDFs);
//! no OCR is attempted on images.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::claims::{flexible_datetime, Claim, ClaimStatus, Location};
use crate::districts;

pub const ALLOWED_EXTENSIONS: [&str; 6] = [".pdf", ".png", ".jpg", ".jpeg", ".docx", ".txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PolicyNumber,
    ClaimantName,
    ClaimantId,
    ProviderName,
    ProviderId,
    ClaimAmount,
    ClaimDate,
    PolicyInceptionDate,
    TreatmentCode,
    DiagnosisCode,
    HospitalName,
    District,
    BrokerId,
}

impl Field {
    const ALL: [Field; 13] = [
        Self::PolicyNumber,
        Self::ClaimantName,
        Self::ClaimantId,
        Self::ProviderName,
        Self::ProviderId,
        Self::ClaimAmount,
        Self::ClaimDate,
        Self::PolicyInceptionDate,
        Self::TreatmentCode,
        Self::DiagnosisCode,
        Self::HospitalName,
        Self::District,
        Self::BrokerId,
    ];

    fn key(self) -> &'static str {
        match self {
            Self::PolicyNumber => "policy_number",
            Self::ClaimantName => "claimant_name",
            Self::ClaimantId => "claimant_id",
            Self::ProviderName => "provider_name",
            Self::ProviderId => "provider_id",
            Self::ClaimAmount => "claim_amount",
            Self::ClaimDate => "claim_date",
            Self::PolicyInceptionDate => "policy_inception_date",
            Self::TreatmentCode => "treatment_code",
            Self::DiagnosisCode => "diagnosis_code",
            Self::HospitalName => "hospital_name",
            Self::District => "district",
            Self::BrokerId => "broker_id",
        }
    }

    /// Label alternatives as they appear on claim forms.
    fn labels(self) -> &'static str {
        match self {
            Self::PolicyNumber => r"policy\s*(?:number|no\.?|#)",
            Self::ClaimantName => r"(?:claimant|patient|insured)\s*name",
            Self::ClaimantId => r"(?:claimant\s*id|hkid|id\s*number)",
            Self::ProviderName => r"provider\s*name",
            Self::ProviderId => r"provider\s*(?:id|code)",
            Self::ClaimAmount => r"(?:claim\s*amount|total\s*amount|amount\s*claimed)",
            Self::ClaimDate => r"(?:claim|treatment|service)\s*date",
            Self::PolicyInceptionDate => r"(?:policy\s*)?(?:inception|start|effective)\s*date",
            Self::TreatmentCode => r"treatment\s*code",
            Self::DiagnosisCode => r"(?:diagnosis\s*code|icd(?:-?10)?(?:\s*code)?)",
            Self::HospitalName => r"(?:hospital|clinic)(?:\s*name)?",
            Self::District => r"district",
            Self::BrokerId => r"broker\s*(?:id|code)",
        }
    }

    fn required(self) -> bool {
        !matches!(self, Self::HospitalName | Self::District | Self::BrokerId)
    }
}

static FIELD_PATTERNS: Lazy<Vec<(Field, Regex)>> = Lazy::new(|| {
    Field::ALL
        .iter()
        .filter_map(|field| {
            let pattern = format!(r"(?im)^[ \t]*{}[ \t]*[:=][ \t]*(.+?)[ \t]*$", field.labels());
            // Patterns are static; a failure here is a programming error caught by tests.
            Regex::new(&pattern).ok().map(|regex| (*field, regex))
        })
        .collect()
});

/// Errors raised while turning an upload into a claim.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionError {
    #[error("File type not supported. Allowed: {allowed}")]
    UnsupportedType { extension: String, allowed: String },
    #[error("could not extract required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },
    #[error("field `{field}` has an unreadable value `{value}`")]
    InvalidValue { field: String, value: String },
}

/// Claim recovered from a document plus how much of the form was readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub claim: Claim,
    /// Share of known fields that were found, 0–1.
    pub extraction_confidence: f64,
    pub extraction_method: String,
    pub fields_found: Vec<String>,
}

/// Lower-cased extension including the dot, when it is one we accept.
pub fn check_extension(filename: &str) -> Result<String, ExtractionError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(ExtractionError::UnsupportedType {
            extension,
            allowed: ALLOWED_EXTENSIONS.join(", "),
        })
    }
}

pub fn extract_claim(filename: &str, content: &[u8]) -> Result<Extraction, ExtractionError> {
    let extension = check_extension(filename)?;
    let text = String::from_utf8_lossy(content);

    let mut values: Vec<(Field, String)> = Vec::new();
    for (field, regex) in FIELD_PATTERNS.iter() {
        if let Some(value) = regex
            .captures(&text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|v| !v.is_empty())
        {
            values.push((*field, value));
        }
    }
    let get = |field: Field| {
        values
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.clone())
    };

    let missing: Vec<String> = Field::ALL
        .iter()
        .filter(|field| field.required() && get(**field).is_none())
        .map(|field| field.key().to_string())
        .collect();
    if !missing.is_empty() {
        debug!(%extension, missing = missing.len(), "document lacks required fields");
        return Err(ExtractionError::MissingFields { fields: missing });
    }

    let required = |field: Field| get(field).unwrap_or_default();
    let location = get(Field::District).map(|name| match districts::find(&name) {
        Some(district) => district.location(),
        None => Location {
            district: name,
            latitude: None,
            longitude: None,
        },
    });
    let now = Utc::now();
    let claim = Claim {
        claim_id: String::new(),
        policy_number: required(Field::PolicyNumber),
        claimant_name: required(Field::ClaimantName),
        claimant_id: required(Field::ClaimantId),
        provider_name: required(Field::ProviderName),
        provider_id: required(Field::ProviderId),
        claim_amount: parse_amount(&required(Field::ClaimAmount))?,
        claim_date: parse_date(Field::ClaimDate, &required(Field::ClaimDate))?,
        policy_inception_date: parse_date(
            Field::PolicyInceptionDate,
            &required(Field::PolicyInceptionDate),
        )?,
        treatment_code: required(Field::TreatmentCode).to_ascii_uppercase(),
        diagnosis_code: required(Field::DiagnosisCode).to_ascii_uppercase(),
        treatment_name: None,
        hospital_name: get(Field::HospitalName),
        location,
        provider_location: None,
        broker_id: get(Field::BrokerId),
        documents: vec![filename.to_string()],
        line_items: Vec::new(),
        historical_amounts: Vec::new(),
        related_amounts: Vec::new(),
        status: ClaimStatus::Pending,
        risk_level: None,
        created_at: now,
        updated_at: now,
    };

    let fields_found: Vec<String> = values.iter().map(|(f, _)| f.key().to_string()).collect();
    let confidence = fields_found.len() as f64 / Field::ALL.len() as f64;
    Ok(Extraction {
        claim,
        extraction_confidence: (confidence * 100.0).round() / 100.0,
        extraction_method: "text_scan".into(),
        fields_found,
    })
}

fn parse_amount(raw: &str) -> Result<f64, ExtractionError> {
    let cleaned: String = raw
        .trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '$' || c.is_whitespace())
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite() && *amount > 0.0)
        .ok_or_else(|| ExtractionError::InvalidValue {
            field: Field::ClaimAmount.key().into(),
            value: raw.into(),
        })
}

/// ISO forms first, then the day-first `dd/mm/yyyy` used on Hong Kong forms.
fn parse_date(field: Field, raw: &str) -> Result<DateTime<Utc>, ExtractionError> {
    flexible_datetime::parse(raw)
        .or_else(|| {
            NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| ExtractionError::InvalidValue {
            field: field.key().into(),
            value: raw.into(),
        })
}
