//! SQLite schema definition.

/// Complete schema of the embedded backend.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Users & Patient Profiles
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS patient_profiles (
    user_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Medication Reference
-- ============================================================================

CREATE TABLE IF NOT EXISTS medications (
    id TEXT PRIMARY KEY,
    generic_name TEXT,
    brand_name TEXT,
    form TEXT,
    strength_value REAL,
    strength_unit TEXT,
    atc_code TEXT
);

CREATE INDEX IF NOT EXISTS idx_medications_generic ON medications(generic_name);

-- ============================================================================
-- Prescriptions (aggregate) and Items (displayed unit)
-- ============================================================================

CREATE TABLE IF NOT EXISTS prescriptions (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patient_profiles(user_id),
    created_by TEXT NOT NULL,
    prescribed_at TEXT NOT NULL,                 -- RFC 3339
    start_date TEXT,
    end_date TEXT,
    status TEXT NOT NULL DEFAULT 'active'        -- active, completed, expired, ...
);

CREATE INDEX IF NOT EXISTS idx_prescriptions_patient
    ON prescriptions(patient_id, prescribed_at);

CREATE TABLE IF NOT EXISTS prescription_items (
    id TEXT PRIMARY KEY,
    prescription_id TEXT NOT NULL REFERENCES prescriptions(id) ON DELETE CASCADE,
    medication_id TEXT NOT NULL REFERENCES medications(id),
    sig_text TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_prescription ON prescription_items(prescription_id);
"#;
