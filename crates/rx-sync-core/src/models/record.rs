//! Flattened, display-ready medication records.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{Medication, Prescription, PrescriptionWithItems};

/// Status grouped first when rendering.
pub const ACTIVE_STATUS: &str = "active";

/// One prescribed medication line, with the owning prescription's shared
/// fields copied onto it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayRecord {
    /// Prescription item ID (backend-assigned, stable)
    pub id: String,
    /// Denormalized medication details, `None` when the lookup found no row
    pub medication: Option<Medication>,
    /// Free-text directions for use (SIG)
    pub directions: Option<String>,
    /// Owning prescription
    pub prescription_id: String,
    /// RFC 3339 issuance timestamp of the prescription
    pub prescribed_at: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: String,
}

impl DisplayRecord {
    /// Build a record from an item and its owning prescription.
    pub fn from_parts(
        id: String,
        directions: Option<String>,
        medication: Option<Medication>,
        prescription: &Prescription,
    ) -> Self {
        Self {
            id,
            medication,
            directions,
            prescription_id: prescription.id.clone(),
            prescribed_at: prescription.prescribed_at.clone(),
            start_date: prescription.start_date.clone(),
            end_date: prescription.end_date.clone(),
            status: prescription.status.clone(),
        }
    }

    /// Flatten nested query results, one record per item, preserving the
    /// aggregate order and item order.
    pub fn flatten(aggregates: Vec<PrescriptionWithItems>) -> Vec<DisplayRecord> {
        aggregates
            .into_iter()
            .flat_map(|agg| {
                let PrescriptionWithItems { prescription, items } = agg;
                items
                    .into_iter()
                    .map(|item| {
                        DisplayRecord::from_parts(
                            item.id,
                            item.sig_text,
                            item.medication,
                            &prescription,
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn is_active(&self) -> bool {
        self.has_status(ACTIVE_STATUS)
    }

    pub fn has_status(&self, status: &str) -> bool {
        self.status == status
    }

    /// Last day of the prescription window, from a `YYYY-MM-DD` date or an
    /// RFC 3339 timestamp.
    pub fn end_day(&self) -> Option<NaiveDate> {
        let end = self.end_date.as_deref()?.trim();
        NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(end).ok().map(|dt| dt.date_naive()))
    }

    /// Whether the window ends between `today` and `days` days later,
    /// inclusive. Records without a readable end date never expire.
    pub fn expires_within(&self, today: NaiveDate, days: u32) -> bool {
        match self.end_day() {
            Some(end) => end >= today && (end - today).num_days() <= i64::from(days),
            None => false,
        }
    }

    /// Card title.
    pub fn display_name(&self) -> &str {
        self.medication
            .as_ref()
            .map(Medication::display_name)
            .unwrap_or(super::medication::UNNAMED_MEDICATION)
    }
}

/// Partial update carried by an update change event.
///
/// Outer `None` means "field not in the notification"; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordPatch {
    pub directions: Option<Option<String>>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.directions.is_none()
    }

    /// Apply the patched fields; everything else is left alone.
    pub fn apply_to(&self, record: &mut DisplayRecord) {
        if let Some(directions) = &self.directions {
            record.directions = directions.clone();
        }
    }
}

/// Records partitioned for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusGroups {
    pub active: Vec<DisplayRecord>,
    pub other: Vec<DisplayRecord>,
}

impl StatusGroups {
    /// Partition by status, keeping relative order within each group.
    pub fn partition<'a, I>(records: I, active_status: &str) -> Self
    where
        I: IntoIterator<Item = &'a DisplayRecord>,
    {
        let (active, other): (Vec<_>, Vec<_>) = records
            .into_iter()
            .cloned()
            .partition(|record| record.has_status(active_status));
        Self { active, other }
    }

    /// Render order: active first, then everything else.
    pub fn into_ordered(self) -> Vec<DisplayRecord> {
        let mut ordered = self.active;
        ordered.extend(self.other);
        ordered
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.other.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NestedItem;

    fn prescription(id: &str, status: &str, at: &str) -> Prescription {
        Prescription {
            id: id.into(),
            patient_id: "patient-1".into(),
            prescribed_at: at.into(),
            start_date: Some("2024-01-01".into()),
            end_date: None,
            status: status.into(),
        }
    }

    fn record(id: &str, status: &str) -> DisplayRecord {
        DisplayRecord::from_parts(
            id.into(),
            None,
            None,
            &prescription("rx", status, "2024-01-15T10:00:00Z"),
        )
    }

    #[test]
    fn test_flatten_copies_aggregate_fields() {
        let aggregates = vec![
            PrescriptionWithItems {
                prescription: prescription("rx-2", "active", "2024-02-01T00:00:00Z"),
                items: vec![
                    NestedItem {
                        id: "item-a".into(),
                        sig_text: Some("1 tablet daily".into()),
                        medication: Some(Medication::new("med-1".into(), "Ibuprofen".into())),
                    },
                    NestedItem {
                        id: "item-b".into(),
                        sig_text: None,
                        medication: None,
                    },
                ],
            },
            PrescriptionWithItems {
                prescription: prescription("rx-1", "completed", "2024-01-01T00:00:00Z"),
                items: vec![NestedItem {
                    id: "item-c".into(),
                    sig_text: None,
                    medication: None,
                }],
            },
        ];

        let records = DisplayRecord::flatten(aggregates);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["item-a", "item-b", "item-c"]);

        assert_eq!(records[1].prescription_id, "rx-2");
        assert_eq!(records[1].prescribed_at, "2024-02-01T00:00:00Z");
        assert_eq!(records[1].start_date, Some("2024-01-01".into()));
        assert_eq!(records[2].status, "completed");
    }

    #[test]
    fn test_flatten_skips_empty_aggregates() {
        let aggregates = vec![PrescriptionWithItems {
            prescription: prescription("rx-1", "active", "2024-01-01T00:00:00Z"),
            items: vec![],
        }];
        assert!(DisplayRecord::flatten(aggregates).is_empty());
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut rec = record("a", "active");
        rec.directions = Some("old".into());
        let before = rec.clone();

        RecordPatch::default().apply_to(&mut rec);
        assert_eq!(rec, before);

        RecordPatch {
            directions: Some(Some("new".into())),
        }
        .apply_to(&mut rec);
        assert_eq!(rec.directions, Some("new".into()));
        assert_eq!(rec.status, before.status);

        RecordPatch {
            directions: Some(None),
        }
        .apply_to(&mut rec);
        assert!(rec.directions.is_none());
    }

    #[test]
    fn test_partition_keeps_relative_order() {
        let records = vec![
            record("1", "completed"),
            record("2", "active"),
            record("3", "expired"),
            record("4", "active"),
        ];

        let groups = StatusGroups::partition(&records, ACTIVE_STATUS);
        let active: Vec<_> = groups.active.iter().map(|r| r.id.as_str()).collect();
        let other: Vec<_> = groups.other.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(active, vec!["2", "4"]);
        assert_eq!(other, vec!["1", "3"]);

        let ordered: Vec<_> = groups.into_ordered().into_iter().map(|r| r.id).collect();
        assert_eq!(ordered, vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn test_status_match_is_exact() {
        assert!(!record("x", "Active").is_active());
        assert!(record("y", "active").is_active());
    }

    #[test]
    fn test_display_name_without_medication() {
        assert_eq!(record("a", "active").display_name(), "Medication");
    }

    #[test]
    fn test_end_day_formats() {
        let mut rec = record("a", "active");
        assert_eq!(rec.end_day(), None);

        rec.end_date = Some("2024-03-31".into());
        assert_eq!(rec.end_day(), NaiveDate::from_ymd_opt(2024, 3, 31));

        rec.end_date = Some("2024-03-31T23:00:00Z".into());
        assert_eq!(rec.end_day(), NaiveDate::from_ymd_opt(2024, 3, 31));

        rec.end_date = Some("end of March".into());
        assert_eq!(rec.end_day(), None);
    }

    #[test]
    fn test_expires_within_window_is_inclusive() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut rec = record("a", "active");

        rec.end_date = Some("2024-03-08".into());
        assert!(rec.expires_within(today, 7));
        assert!(!rec.expires_within(today, 6));

        rec.end_date = Some("2024-03-01".into());
        assert!(rec.expires_within(today, 0));

        rec.end_date = Some("2024-02-29".into());
        assert!(!rec.expires_within(today, 30));

        rec.end_date = None;
        assert!(!rec.expires_within(today, 365));
    }
}
