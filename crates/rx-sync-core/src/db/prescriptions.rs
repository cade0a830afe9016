//! Prescription and prescription item database operations.

use chrono::SecondsFormat;
use rusqlite::{params, OptionalExtension, Row};

use super::{constraint_or_sqlite, Database, DbError, DbResult};
use crate::models::{
    Medication, NestedItem, NewPrescription, NewPrescriptionItem, Prescription,
    PrescriptionItem, PrescriptionWithItems, DEFAULT_STATUS,
};

fn prescription_from_row(row: &Row<'_>) -> rusqlite::Result<Prescription> {
    Ok(Prescription {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        prescribed_at: row.get(2)?,
        start_date: row.get(3)?,
        end_date: row.get(4)?,
        status: row.get(5)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<PrescriptionItem> {
    Ok(PrescriptionItem {
        id: row.get(0)?,
        prescription_id: row.get(1)?,
        medication_id: row.get(2)?,
        sig_text: row.get(3)?,
    })
}

/// Current time in the format stored for `prescribed_at`.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    /// Create a prescription for a patient, returning the stored row.
    pub fn insert_prescription(&self, new: &NewPrescription) -> DbResult<Prescription> {
        let prescription = Prescription {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: new.patient_id.clone(),
            prescribed_at: now_timestamp(),
            start_date: None,
            end_date: None,
            status: DEFAULT_STATUS.to_string(),
        };

        self.conn
            .execute(
                r#"
                INSERT INTO prescriptions (
                    id, patient_id, created_by, prescribed_at, start_date, end_date, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    prescription.id,
                    prescription.patient_id,
                    new.created_by,
                    prescription.prescribed_at,
                    prescription.start_date,
                    prescription.end_date,
                    prescription.status,
                ],
            )
            .map_err(|e| constraint_or_sqlite(e, "prescriptions"))?;

        Ok(prescription)
    }

    /// Get a prescription by ID.
    pub fn get_prescription(&self, id: &str) -> DbResult<Option<Prescription>> {
        self.conn
            .query_row(
                r#"
                SELECT id, patient_id, prescribed_at, start_date, end_date, status
                FROM prescriptions
                WHERE id = ?
                "#,
                [id],
                prescription_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Change a prescription's status. Returns false if it does not exist.
    pub fn update_prescription_status(&self, id: &str, status: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE prescriptions SET status = ? WHERE id = ?",
            [status, id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Set a prescription's validity window.
    pub fn set_prescription_window(
        &self,
        id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE prescriptions SET start_date = ?, end_date = ? WHERE id = ?",
            params![start_date, end_date, id],
        )?;
        Ok(rows_affected > 0)
    }

    /// Add an item to a prescription, returning the stored row.
    pub fn insert_prescription_item(
        &self,
        new: &NewPrescriptionItem,
    ) -> DbResult<PrescriptionItem> {
        let item = PrescriptionItem {
            id: uuid::Uuid::new_v4().to_string(),
            prescription_id: new.prescription_id.clone(),
            medication_id: new.medication_id.clone(),
            sig_text: new.sig_text.clone(),
        };

        self.conn
            .execute(
                r#"
                INSERT INTO prescription_items (id, prescription_id, medication_id, sig_text)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    item.id,
                    item.prescription_id,
                    item.medication_id,
                    item.sig_text
                ],
            )
            .map_err(|e| constraint_or_sqlite(e, "prescription_items"))?;

        Ok(item)
    }

    /// Get a prescription item by ID.
    pub fn get_prescription_item(&self, id: &str) -> DbResult<Option<PrescriptionItem>> {
        self.conn
            .query_row(
                r#"
                SELECT id, prescription_id, medication_id, sig_text
                FROM prescription_items
                WHERE id = ?
                "#,
                [id],
                item_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Replace an item's directions, returning the updated row.
    pub fn update_item_directions(
        &self,
        id: &str,
        sig_text: Option<&str>,
    ) -> DbResult<PrescriptionItem> {
        let rows_affected = self.conn.execute(
            "UPDATE prescription_items SET sig_text = ? WHERE id = ?",
            params![sig_text, id],
        )?;
        if rows_affected == 0 {
            return Err(DbError::NotFound(format!("prescription item {}", id)));
        }
        self.get_prescription_item(id)?
            .ok_or_else(|| DbError::NotFound(format!("prescription item {}", id)))
    }

    /// Delete an item, returning the row as it was.
    pub fn delete_prescription_item(&self, id: &str) -> DbResult<Option<PrescriptionItem>> {
        let existing = self.get_prescription_item(id)?;
        if existing.is_some() {
            self.conn
                .execute("DELETE FROM prescription_items WHERE id = ?", [id])?;
        }
        Ok(existing)
    }

    /// All prescriptions of a patient with nested items and medications,
    /// newest first.
    pub fn list_prescriptions_with_items(
        &self,
        patient_id: &str,
    ) -> DbResult<Vec<PrescriptionWithItems>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.id, p.patient_id, p.prescribed_at, p.start_date, p.end_date, p.status,
                   i.id, i.sig_text,
                   m.id, m.generic_name, m.brand_name, m.form,
                   m.strength_value, m.strength_unit, m.atc_code
            FROM prescriptions p
            LEFT JOIN prescription_items i ON i.prescription_id = p.id
            LEFT JOIN medications m ON m.id = i.medication_id
            WHERE p.patient_id = ?
            ORDER BY p.prescribed_at DESC, p.rowid DESC, i.rowid ASC
            "#,
        )?;

        let rows = stmt.query_map([patient_id], |row| {
            let prescription = prescription_from_row(row)?;
            let item_id: Option<String> = row.get(6)?;
            let medication_id: Option<String> = row.get(8)?;

            let medication = match medication_id {
                Some(id) => Some(Medication {
                    id,
                    generic_name: row.get(9)?,
                    brand_name: row.get(10)?,
                    form: row.get(11)?,
                    strength_value: row.get(12)?,
                    strength_unit: row.get(13)?,
                    atc_code: row.get(14)?,
                }),
                None => None,
            };

            let item = match item_id {
                Some(id) => Some(NestedItem {
                    id,
                    sig_text: row.get(7)?,
                    medication,
                }),
                None => None,
            };

            Ok((prescription, item))
        })?;

        let mut aggregates: Vec<PrescriptionWithItems> = Vec::new();
        for row in rows {
            let (prescription, item) = row?;
            match aggregates.last_mut() {
                Some(last) if last.prescription.id == prescription.id => {
                    last.items.extend(item);
                }
                _ => aggregates.push(PrescriptionWithItems {
                    prescription,
                    items: item.into_iter().collect(),
                }),
            }
        }
        Ok(aggregates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_patient_profile("patient-1").unwrap();
        db.upsert_patient_profile("patient-2").unwrap();
        db.upsert_medication(&Medication::new("med-1".into(), "Ibuprofen".into()))
            .unwrap();
        db.upsert_medication(&Medication::new("med-2".into(), "Amoxicillin".into()))
            .unwrap();
        db
    }

    fn new_rx(patient: &str) -> NewPrescription {
        NewPrescription {
            patient_id: patient.into(),
            created_by: patient.into(),
        }
    }

    fn new_item(rx: &str, med: &str, sig: &str) -> NewPrescriptionItem {
        NewPrescriptionItem {
            prescription_id: rx.into(),
            medication_id: med.into(),
            sig_text: Some(sig.into()),
        }
    }

    #[test]
    fn test_insert_prescription_defaults() {
        let db = setup_db();
        let rx = db.insert_prescription(&new_rx("patient-1")).unwrap();

        assert_eq!(rx.status, "active");
        assert_eq!(rx.id.len(), 36); // UUID format
        assert!(chrono::DateTime::parse_from_rfc3339(&rx.prescribed_at).is_ok());

        let stored = db.get_prescription(&rx.id).unwrap().unwrap();
        assert_eq!(stored, rx);
    }

    #[test]
    fn test_insert_prescription_without_profile_is_constraint() {
        let db = setup_db();
        let result = db.insert_prescription(&new_rx("stranger"));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_item_with_unknown_medication_is_constraint() {
        let db = setup_db();
        let rx = db.insert_prescription(&new_rx("patient-1")).unwrap();
        let result = db.insert_prescription_item(&new_item(&rx.id, "missing", "daily"));
        assert!(matches!(result, Err(DbError::Constraint(_))));
    }

    #[test]
    fn test_nested_listing_newest_first() {
        let db = setup_db();

        let older = db.insert_prescription(&new_rx("patient-1")).unwrap();
        db.insert_prescription_item(&new_item(&older.id, "med-1", "once daily"))
            .unwrap();
        db.insert_prescription_item(&new_item(&older.id, "med-2", "twice daily"))
            .unwrap();

        let newer = db.insert_prescription(&new_rx("patient-1")).unwrap();
        db.insert_prescription_item(&new_item(&newer.id, "med-2", "at night"))
            .unwrap();

        let other = db.insert_prescription(&new_rx("patient-2")).unwrap();
        db.insert_prescription_item(&new_item(&other.id, "med-1", "not mine"))
            .unwrap();

        let aggregates = db.list_prescriptions_with_items("patient-1").unwrap();
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].prescription.id, newer.id);
        assert_eq!(aggregates[0].items.len(), 1);
        assert_eq!(aggregates[1].prescription.id, older.id);

        let sigs: Vec<_> = aggregates[1]
            .items
            .iter()
            .map(|i| i.sig_text.clone().unwrap())
            .collect();
        assert_eq!(sigs, vec!["once daily", "twice daily"]);

        let med = aggregates[1].items[0].medication.as_ref().unwrap();
        assert_eq!(med.generic_name, Some("Ibuprofen".into()));
    }

    #[test]
    fn test_prescription_without_items_listed_empty() {
        let db = setup_db();
        db.insert_prescription(&new_rx("patient-1")).unwrap();

        let aggregates = db.list_prescriptions_with_items("patient-1").unwrap();
        assert_eq!(aggregates.len(), 1);
        assert!(aggregates[0].items.is_empty());
    }

    #[test]
    fn test_update_and_delete_item() {
        let db = setup_db();
        let rx = db.insert_prescription(&new_rx("patient-1")).unwrap();
        let item = db
            .insert_prescription_item(&new_item(&rx.id, "med-1", "daily"))
            .unwrap();

        let updated = db.update_item_directions(&item.id, Some("twice daily")).unwrap();
        assert_eq!(updated.sig_text, Some("twice daily".into()));

        let deleted = db.delete_prescription_item(&item.id).unwrap();
        assert_eq!(deleted.map(|i| i.id), Some(item.id.clone()));
        assert!(db.delete_prescription_item(&item.id).unwrap().is_none());

        assert!(matches!(
            db.update_item_directions(&item.id, None),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_status_and_window_updates() {
        let db = setup_db();
        let rx = db.insert_prescription(&new_rx("patient-1")).unwrap();

        assert!(db.update_prescription_status(&rx.id, "completed").unwrap());
        assert!(db
            .set_prescription_window(&rx.id, Some("2024-01-01"), Some("2024-02-01"))
            .unwrap());

        let stored = db.get_prescription(&rx.id).unwrap().unwrap();
        assert_eq!(stored.status, "completed");
        assert_eq!(stored.end_date, Some("2024-02-01".into()));

        assert!(!db.update_prescription_status("missing", "expired").unwrap());
    }
}
