use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::models::{
    parse_date, parse_flag, AttendanceRecord, ClassFilter, NaturalKey, RecordMode, Role,
    StudentRef, UserProfile,
};

/// The durable table of users, class rosters and attendance rows.
///
/// Each call is an independent request; nothing is assumed about isolation
/// between calls, so callers treat `NotFound` and `DuplicateEntry` as normal
/// outcomes of a row changing underneath them.
#[allow(async_fn_in_trait)]
pub trait RowStore {
    async fn list_classes(&self) -> Result<Vec<String>, LedgerError>;

    async fn list_students(&self, filter: &ClassFilter) -> Result<Vec<StudentRef>, LedgerError>;

    /// Adds a student to the class roster. Returns false if already listed.
    async fn register_student(&self, student: &StudentRef) -> Result<bool, LedgerError>;

    async fn fetch_records(
        &self,
        filter: &ClassFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError>;

    async fn user_profile(&self, email: &str) -> Result<UserProfile, LedgerError>;

    async fn insert_record(
        &self,
        record: &AttendanceRecord,
        mode: RecordMode,
        recorded_by: &str,
    ) -> Result<(), LedgerError>;

    async fn update_redeem(
        &self,
        key: &NaturalKey,
        redeem_date: NaiveDate,
    ) -> Result<(), LedgerError>;
}

/// Imports attendance rows from a CSV export of the attendance sheet.
///
/// Expected headers: `class` (or `className`), `studentName`,
/// `attendanceDate`, and optionally `redeemed`, `redeemDate`. Rows whose
/// natural key is already stored are skipped. Returns the number inserted.
pub async fn import_csv<S: RowStore>(
    store: &S,
    csv_path: &Path,
    recorded_by: &str,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CsvRow {
        #[serde(alias = "className")]
        class: String,
        student_name: String,
        attendance_date: String,
        #[serde(default)]
        redeemed: Option<String>,
        #[serde(default)]
        redeem_date: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let attendance_date = parse_date(&row.attendance_date)
            .with_context(|| format!("row {}: bad attendanceDate {:?}", line + 1, row.attendance_date))?;
        let redeem_date = match row.redeem_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_date(raw)
                    .with_context(|| format!("row {}: bad redeemDate {raw:?}", line + 1))?,
            ),
        };

        let mut record = AttendanceRecord::new(&row.class, &row.student_name, attendance_date);
        record.redeemed = row.redeemed.as_deref().map(parse_flag).unwrap_or(false);
        record.redeem_date = redeem_date;

        store
            .register_student(&StudentRef::new(&record.student_name, &record.class))
            .await?;
        match store
            .insert_record(&record, RecordMode::Create, recorded_by)
            .await
        {
            Ok(()) => inserted += 1,
            Err(LedgerError::DuplicateEntry(key)) => {
                debug!(%key, "skipping row already stored");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("row {}", line + 1));
            }
        }
    }

    info!(inserted, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

/// Demo users for `seed` and `--in-memory`.
pub fn seed_profiles() -> Vec<UserProfile> {
    vec![
        UserProfile {
            email: "admin@parish.example".to_string(),
            role: Role::Admin,
            classes: Vec::new(),
            default_class: String::new(),
        },
        UserProfile {
            email: "teacher.c1@parish.example".to_string(),
            role: Role::Teacher,
            classes: vec!["C1".to_string()],
            default_class: "C1".to_string(),
        },
        UserProfile {
            email: "teacher.c2@parish.example".to_string(),
            role: Role::Teacher,
            classes: vec!["C2".to_string()],
            default_class: "C2".to_string(),
        },
    ]
}

pub fn seed_roster() -> Vec<StudentRef> {
    vec![
        StudentRef::new("陳小明", "C1"),
        StudentRef::new("林美華", "C1"),
        StudentRef::new("王大同", "C2"),
        StudentRef::new("張家豪", "C2"),
        StudentRef::new("李安妮", "C2"),
    ]
}

pub fn seed_records() -> Vec<AttendanceRecord> {
    let day = |m: u32, d: u32| NaiveDate::from_ymd_opt(2024, m, d).unwrap_or_default();
    vec![
        AttendanceRecord::new("C1", "陳小明", day(1, 7)),
        AttendanceRecord::new("C1", "陳小明", day(1, 14)),
        AttendanceRecord::new("C1", "陳小明", day(1, 21)).redeemed_on(day(1, 28)),
        AttendanceRecord::new("C1", "林美華", day(1, 7)),
        AttendanceRecord::new("C1", "林美華", day(1, 14)),
        AttendanceRecord::new("C2", "王大同", day(1, 7)).redeemed_on(day(1, 28)),
        AttendanceRecord::new("C2", "王大同", day(1, 14)).redeemed_on(day(1, 28)),
        AttendanceRecord::new("C2", "王大同", day(1, 21)).redeemed_on(day(1, 28)),
        AttendanceRecord::new("C2", "張家豪", day(1, 7)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_csv(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "{}-{}.csv",
            name,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::write(&path, body).expect("write csv");
        path
    }

    #[tokio::test]
    async fn import_skips_rows_already_stored() {
        let store = MemoryStore::seeded();
        let path = temp_csv(
            "import-skip",
            "className,studentName,attendanceDate,redeemed,redeemDate\n\
             C1,陳小明,2024-01-07,,\n\
             C1,陳小明,2024-01-28,TRUE,2024-02-04\n\
             C3,Maria,2024-01-28,false,\n",
        );

        let inserted = import_csv(&store, &path, "import").await.unwrap();
        assert_eq!(inserted, 2);

        let records = store.fetch_records(&ClassFilter::All).await.unwrap();
        assert_eq!(records.len(), seed_records().len() + 2);
        let redeemed = records
            .iter()
            .find(|r| r.attendance_date == NaiveDate::from_ymd_opt(2024, 1, 28).unwrap()
                && r.class == "C1")
            .unwrap();
        assert!(redeemed.redeemed);

        let classes = store.list_classes().await.unwrap();
        assert!(classes.contains(&"C3".to_string()));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn import_rejects_bad_dates() {
        let store = MemoryStore::default();
        let path = temp_csv(
            "import-bad",
            "class,studentName,attendanceDate\nC1,Kai,next sunday\n",
        );
        let err = import_csv(&store, &path, "import").await.unwrap_err();
        assert!(err.to_string().contains("attendanceDate"));
        let _ = std::fs::remove_file(path);
    }
}
