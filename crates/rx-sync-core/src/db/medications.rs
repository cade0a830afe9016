//! Medication reference database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::Medication;

const MEDICATION_COLUMNS: &str =
    "id, generic_name, brand_name, form, strength_value, strength_unit, atc_code";

fn medication_from_row(row: &Row<'_>) -> rusqlite::Result<Medication> {
    Ok(Medication {
        id: row.get(0)?,
        generic_name: row.get(1)?,
        brand_name: row.get(2)?,
        form: row.get(3)?,
        strength_value: row.get(4)?,
        strength_unit: row.get(5)?,
        atc_code: row.get(6)?,
    })
}

impl Database {
    /// Insert or update a medication.
    pub fn upsert_medication(&self, med: &Medication) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO medications (
                id, generic_name, brand_name, form, strength_value, strength_unit, atc_code
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                generic_name = excluded.generic_name,
                brand_name = excluded.brand_name,
                form = excluded.form,
                strength_value = excluded.strength_value,
                strength_unit = excluded.strength_unit,
                atc_code = excluded.atc_code
            "#,
            params![
                med.id,
                med.generic_name,
                med.brand_name,
                med.form,
                med.strength_value,
                med.strength_unit,
                med.atc_code,
            ],
        )?;
        Ok(())
    }

    /// Get a medication by ID.
    pub fn get_medication(&self, id: &str) -> DbResult<Option<Medication>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM medications WHERE id = ?", MEDICATION_COLUMNS),
                [id],
                medication_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Case-insensitive substring search over generic and brand names,
    /// ordered by generic name. A blank query lists everything.
    pub fn search_medications(&self, query: &str, limit: usize) -> DbResult<Vec<Medication>> {
        let query = query.trim();
        let pattern = format!("%{}%", escape_like(query));

        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {}
            FROM medications
            WHERE ?1 = ''
               OR generic_name LIKE ?2 ESCAPE '\'
               OR brand_name LIKE ?2 ESCAPE '\'
            ORDER BY generic_name COLLATE NOCASE ASC
            LIMIT ?3
            "#,
            MEDICATION_COLUMNS
        ))?;

        let rows = stmt.query_map(params![query, pattern, limit as i64], medication_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();

        let mut panadol = Medication::new("med-1".into(), "Paracetamol".into());
        panadol.brand_name = Some("Panadol".into());
        panadol.strength_value = Some(500.0);
        panadol.strength_unit = Some("mg".into());
        db.upsert_medication(&panadol).unwrap();

        db.upsert_medication(&Medication::new("med-2".into(), "Amoxicillin".into()))
            .unwrap();
        db.upsert_medication(&Medication::new("med-3".into(), "Ibuprofen".into()))
            .unwrap();
        db
    }

    #[test]
    fn test_get_medication() {
        let db = setup_db();
        let med = db.get_medication("med-1").unwrap().unwrap();
        assert_eq!(med.brand_name, Some("Panadol".into()));
        assert_eq!(med.strength_value, Some(500.0));

        assert!(db.get_medication("missing").unwrap().is_none());
    }

    #[test]
    fn test_search_by_generic_or_brand() {
        let db = setup_db();

        let results = db.search_medications("pana", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "med-1");

        let results = db.search_medications("PARACET", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_blank_search_lists_sorted() {
        let db = setup_db();

        let results = db.search_medications("  ", 10).unwrap();
        let names: Vec<_> = results
            .iter()
            .map(|m| m.generic_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Amoxicillin", "Ibuprofen", "Paracetamol"]);

        assert_eq!(db.search_medications("", 2).unwrap().len(), 2);
    }

    #[test]
    fn test_search_wildcards_are_literal() {
        let db = setup_db();
        assert!(db.search_medications("%", 10).unwrap().is_empty());
        assert_eq!(escape_like("50%_"), "50\\%\\_");
    }
}
