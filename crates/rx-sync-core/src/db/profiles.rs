//! User and patient profile database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::AuthUser;

impl Database {
    /// Insert or update the application user row.
    pub fn upsert_app_user(&self, id: &str, email: Option<&str>) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO users (id, email) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                updated_at = datetime('now')
            "#,
            params![id, email],
        )?;
        Ok(())
    }

    /// Get an application user by ID.
    pub fn get_app_user(&self, id: &str) -> DbResult<Option<AuthUser>> {
        self.conn
            .query_row("SELECT id, email FROM users WHERE id = ?", [id], |row| {
                Ok(AuthUser {
                    id: row.get(0)?,
                    email: row.get(1)?,
                })
            })
            .optional()
            .map_err(Into::into)
    }

    /// Ensure a patient profile row exists. Idempotent.
    pub fn upsert_patient_profile(&self, user_id: &str) -> DbResult<()> {
        self.conn.execute(
            "INSERT INTO patient_profiles (user_id) VALUES (?) ON CONFLICT(user_id) DO NOTHING",
            [user_id],
        )?;
        Ok(())
    }

    /// Check whether a patient profile exists.
    pub fn has_patient_profile(&self, user_id: &str) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM patient_profiles WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_app_user() {
        let db = setup_db();

        db.upsert_app_user("user-1", None).unwrap();
        let user = db.get_app_user("user-1").unwrap().unwrap();
        assert!(user.email.is_none());

        db.upsert_app_user("user-1", Some("pat@example.com")).unwrap();
        let user = db.get_app_user("user-1").unwrap().unwrap();
        assert_eq!(user.email, Some("pat@example.com".into()));
    }

    #[test]
    fn test_profile_upsert_is_idempotent() {
        let db = setup_db();

        assert!(!db.has_patient_profile("user-1").unwrap());
        db.upsert_patient_profile("user-1").unwrap();
        db.upsert_patient_profile("user-1").unwrap();
        assert!(db.has_patient_profile("user-1").unwrap());
    }
}
