//! Medication reference models.

use serde::{Deserialize, Serialize};

/// Fallback name when a medication row carries neither brand nor generic name.
pub const UNNAMED_MEDICATION: &str = "Medication";

/// A row of the medication reference table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medication {
    /// Backend identifier
    pub id: String,
    /// International non-proprietary name (e.g., "Paracetamol")
    pub generic_name: Option<String>,
    /// Brand name (e.g., "Panadol")
    #[serde(default)]
    pub brand_name: Option<String>,
    /// Dosage form (e.g., "tablet", "syrup")
    #[serde(default)]
    pub form: Option<String>,
    /// Numeric strength (e.g., 500.0)
    pub strength_value: Option<f64>,
    /// Strength unit (e.g., "mg")
    pub strength_unit: Option<String>,
    /// ATC classification code
    #[serde(default)]
    pub atc_code: Option<String>,
}

impl Medication {
    /// Create a medication with only the generic name set.
    pub fn new(id: String, generic_name: String) -> Self {
        Self {
            id,
            generic_name: Some(generic_name),
            brand_name: None,
            form: None,
            strength_value: None,
            strength_unit: None,
            atc_code: None,
        }
    }

    /// Name shown on a medication card: brand first, then generic.
    pub fn display_name(&self) -> &str {
        non_blank(&self.brand_name)
            .or_else(|| non_blank(&self.generic_name))
            .unwrap_or(UNNAMED_MEDICATION)
    }

    /// Strength rendered as "500 mg", or `None` when nothing is known.
    pub fn dose_label(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.strength_value.map(format_strength),
            non_blank(&self.strength_unit).map(str::to_string),
        ]
        .into_iter()
        .flatten()
        .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Entry of the add-medication picker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedOption {
    pub id: String,
    /// e.g. "Panadol (Paracetamol) 500 mg tablet"
    pub label: String,
    /// e.g. "ATC: N02BE01"
    pub sublabel: Option<String>,
}

impl From<&Medication> for MedOption {
    fn from(med: &Medication) -> Self {
        let main = match (non_blank(&med.brand_name), non_blank(&med.generic_name)) {
            (Some(brand), Some(generic)) => format!("{} ({})", brand, generic),
            (Some(brand), None) => brand.to_string(),
            (None, Some(generic)) => generic.to_string(),
            (None, None) => UNNAMED_MEDICATION.to_string(),
        };

        let mut label = main.clone();
        if let Some(dose) = med.dose_label() {
            label.push(' ');
            label.push_str(&dose);
        }
        if let Some(form) = non_blank(&med.form) {
            label.push(' ');
            label.push_str(form);
        }
        let label = label.trim().to_string();

        Self {
            id: med.id.clone(),
            label: if label.is_empty() { main } else { label },
            sublabel: non_blank(&med.atc_code).map(|code| format!("ATC: {}", code)),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// 500.0 -> "500", 2.5 -> "2.5"
fn format_strength(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
