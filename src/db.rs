use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::collation;
use crate::error::LedgerError;
use crate::models::{
    normalize_email, AttendanceRecord, ClassFilter, NaturalKey, RecordMode, StudentRef,
    UserProfile,
};
use crate::store::{self, RowStore};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    for profile in store::seed_profiles() {
        sqlx::query(
            r#"
            INSERT INTO mass_attendance.users (email, role, classes, default_class)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET role = EXCLUDED.role,
                classes = EXCLUDED.classes,
                default_class = EXCLUDED.default_class
            "#,
        )
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .bind(profile.classes.join(","))
        .bind(&profile.default_class)
        .execute(pool)
        .await?;
    }

    let store = PgStore::new(pool.clone());
    for student in store::seed_roster() {
        store.register_student(&student).await?;
    }

    let mut inserted = 0usize;
    for record in store::seed_records() {
        match store.insert_record(&record, RecordMode::Create, "seed").await {
            Ok(()) => inserted += 1,
            Err(LedgerError::DuplicateEntry(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    info!(inserted, "seed rows written");

    Ok(())
}

/// Postgres-backed row store. The natural key is a unique constraint on
/// `mass_attendance.attendance`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn insert_error(err: sqlx::Error, key: NaturalKey) -> LedgerError {
    let unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if unique {
        LedgerError::DuplicateEntry(key)
    } else {
        err.into()
    }
}

impl RowStore for PgStore {
    async fn list_classes(&self) -> Result<Vec<String>, LedgerError> {
        let rows = sqlx::query(
            "SELECT class FROM mass_attendance.students \
             UNION SELECT class FROM mass_attendance.attendance",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut classes: Vec<String> = rows.iter().map(|row| row.get("class")).collect();
        collation::sort_names(&mut classes);
        Ok(classes)
    }

    async fn list_students(&self, filter: &ClassFilter) -> Result<Vec<StudentRef>, LedgerError> {
        let mut query = String::from("SELECT name, class FROM mass_attendance.students");
        if let ClassFilter::Class(_) = filter {
            query.push_str(" WHERE class = $1");
        }

        let mut rows = sqlx::query(&query);
        if let ClassFilter::Class(class) = filter {
            rows = rows.bind(class);
        }

        let mut students: Vec<StudentRef> = rows
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| StudentRef::new(row.get("name"), row.get("class")))
            .collect();
        collation::sort_by_class_and_name(&mut students, |s| (s.class.as_str(), s.name.as_str()));
        Ok(students)
    }

    async fn register_student(&self, student: &StudentRef) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mass_attendance.students (class, name)
            VALUES ($1, $2)
            ON CONFLICT (class, name) DO NOTHING
            "#,
        )
        .bind(&student.class)
        .bind(&student.name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_records(
        &self,
        filter: &ClassFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut query = String::from(
            "SELECT class, student_name, attendance_date, redeemed, redeem_date \
             FROM mass_attendance.attendance",
        );
        if let ClassFilter::Class(_) = filter {
            query.push_str(" WHERE class = $1");
        }
        query.push_str(" ORDER BY recorded_at");

        let mut rows = sqlx::query(&query);
        if let ClassFilter::Class(class) = filter {
            rows = rows.bind(class);
        }

        let mut records = Vec::new();
        for row in rows.fetch_all(&self.pool).await? {
            records.push(AttendanceRecord {
                class: row.get("class"),
                student_name: row.get("student_name"),
                attendance_date: row.get("attendance_date"),
                redeemed: row.get("redeemed"),
                redeem_date: row.get("redeem_date"),
            });
        }

        Ok(records)
    }

    async fn user_profile(&self, email: &str) -> Result<UserProfile, LedgerError> {
        let email = normalize_email(email);
        let row = sqlx::query(
            "SELECT email, role, classes, default_class \
             FROM mass_attendance.users WHERE lower(email) = $1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserProfile::from_columns(
                row.get("email"),
                row.get("role"),
                row.get("classes"),
                row.get("default_class"),
            ),
            None => UserProfile::unregistered(&email),
        })
    }

    async fn insert_record(
        &self,
        record: &AttendanceRecord,
        mode: RecordMode,
        recorded_by: &str,
    ) -> Result<(), LedgerError> {
        let conflict = match mode {
            RecordMode::Create => "DO NOTHING",
            RecordMode::Upsert => {
                "DO UPDATE SET redeemed = EXCLUDED.redeemed, \
                 redeem_date = EXCLUDED.redeem_date, \
                 recorded_by = EXCLUDED.recorded_by"
            }
        };
        let query = format!(
            "INSERT INTO mass_attendance.attendance \
             (id, class, student_name, attendance_date, redeemed, redeem_date, recorded_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (class, student_name, attendance_date) {conflict}"
        );

        let result = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&record.class)
            .bind(&record.student_name)
            .bind(record.attendance_date)
            .bind(record.redeemed)
            .bind(record.redeem_date)
            .bind(recorded_by)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(e, record.key()))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::DuplicateEntry(record.key()));
        }
        Ok(())
    }

    async fn update_redeem(
        &self,
        key: &NaturalKey,
        redeem_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE mass_attendance.attendance
            SET redeemed = TRUE, redeem_date = $4
            WHERE class = $1 AND student_name = $2 AND attendance_date = $3
            "#,
        )
        .bind(&key.class)
        .bind(&key.student_name)
        .bind(key.attendance_date)
        .bind(redeem_date)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(key.clone()));
        }
        Ok(())
    }
}
