//! Prescription aggregate and item row models.

use serde::{Deserialize, Serialize};

use super::Medication;

/// Status value the backend assigns to new prescriptions.
pub const DEFAULT_STATUS: &str = "active";

/// Status of a prescription whose course was finished.
pub const COMPLETED_STATUS: &str = "completed";

/// Status of a prescription that ran past its end date.
pub const EXPIRED_STATUS: &str = "expired";

/// Status of a prescription waiting for the prescriber to renew it.
pub const REFILL_REQUESTED_STATUS: &str = "refill_requested";

/// Authenticated user as reported by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

/// A prescription (the aggregate grouping prescribed items).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    /// Owning patient (the authenticated subject)
    pub patient_id: String,
    /// RFC 3339 issuance timestamp
    pub prescribed_at: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// "active", "completed", "expired", ...
    pub status: String,
}

/// A prescribed item row, as carried by realtime row images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionItem {
    pub id: String,
    pub prescription_id: String,
    pub medication_id: String,
    #[serde(default)]
    pub sig_text: Option<String>,
}

/// Item nested under its prescription in the bulk query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NestedItem {
    pub id: String,
    pub sig_text: Option<String>,
    pub medication: Option<Medication>,
}

/// Result shape of the nested prescriptions query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionWithItems {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<NestedItem>,
}

/// Insert payload for a prescription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPrescription {
    pub patient_id: String,
    pub created_by: String,
}

/// Insert payload for a prescription item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPrescriptionItem {
    pub prescription_id: String,
    pub medication_id: String,
    pub sig_text: Option<String>,
}
