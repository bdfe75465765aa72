use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use tokio::sync::RwLock;
use tracing::debug;

use crate::collation;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::models::{
    normalize_email, AttendanceRecord, ClassFilter, NaturalKey, RecordMode, StudentRef,
    UserProfile,
};
use crate::store::{self, RowStore};

#[derive(Default)]
struct MemoryState {
    ledger: Ledger,
    roster: BTreeSet<StudentRef>,
    profiles: HashMap<String, UserProfile>,
}

/// Row store kept in process, indexed by natural key.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn seeded() -> Self {
        let mut store = Self::default().with_records(store::seed_records());
        for profile in store::seed_profiles() {
            store = store.with_profile(profile);
        }
        for student in store::seed_roster() {
            store = store.with_student(student);
        }
        store
    }

    pub fn with_records(mut self, records: Vec<AttendanceRecord>) -> Self {
        let state = self.state.get_mut();
        for record in &records {
            state
                .roster
                .insert(StudentRef::new(&record.student_name, &record.class));
        }
        state.ledger = Ledger::from_records(records);
        self
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.state
            .get_mut()
            .profiles
            .insert(normalize_email(&profile.email), profile);
        self
    }

    pub fn with_student(mut self, student: StudentRef) -> Self {
        self.state.get_mut().roster.insert(student);
        self
    }
}

impl RowStore for MemoryStore {
    async fn list_classes(&self) -> Result<Vec<String>, LedgerError> {
        let state = self.state.read().await;
        let classes: BTreeSet<&str> = state
            .roster
            .iter()
            .map(|s| s.class.as_str())
            .chain(state.ledger.records().iter().map(|r| r.class.as_str()))
            .collect();
        let mut classes: Vec<String> = classes.into_iter().map(str::to_string).collect();
        collation::sort_names(&mut classes);
        Ok(classes)
    }

    async fn list_students(&self, filter: &ClassFilter) -> Result<Vec<StudentRef>, LedgerError> {
        let state = self.state.read().await;
        let mut students: Vec<StudentRef> = state
            .roster
            .iter()
            .filter(|s| filter.matches(&s.class))
            .cloned()
            .collect();
        collation::sort_by_class_and_name(&mut students, |s| (s.class.as_str(), s.name.as_str()));
        Ok(students)
    }

    async fn register_student(&self, student: &StudentRef) -> Result<bool, LedgerError> {
        Ok(self.state.write().await.roster.insert(student.clone()))
    }

    async fn fetch_records(
        &self,
        filter: &ClassFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .records()
            .iter()
            .filter(|r| filter.matches(&r.class))
            .cloned()
            .collect())
    }

    async fn user_profile(&self, email: &str) -> Result<UserProfile, LedgerError> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state
            .profiles
            .get(&email)
            .cloned()
            .unwrap_or_else(|| UserProfile::unregistered(&email)))
    }

    async fn insert_record(
        &self,
        record: &AttendanceRecord,
        mode: RecordMode,
        recorded_by: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.ledger.record_attendance(record.clone(), mode)?;
        debug!(key = %record.key(), recorded_by, rows = state.ledger.len(), "memory insert");
        Ok(())
    }

    async fn update_redeem(
        &self,
        key: &NaturalKey,
        redeem_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        self.state
            .write()
            .await
            .ledger
            .update_redeem_status(key, redeem_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn seeded_store_lists_classes_and_roster() {
        let store = MemoryStore::seeded();
        assert_eq!(store.list_classes().await.unwrap(), vec!["C1", "C2"]);

        let c2 = store
            .list_students(&ClassFilter::parse("C2"))
            .await
            .unwrap();
        let names: Vec<&str> = c2.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["王大同", "李安妮", "張家豪"]);
        assert!(c2.iter().all(|s| s.class == "C2"));
    }

    #[tokio::test]
    async fn unknown_email_gets_empty_teacher_profile() {
        let store = MemoryStore::seeded();
        let profile = store.user_profile("Stranger@Parish.example").await.unwrap();
        assert_eq!(profile.role, Role::Teacher);
        assert!(profile.classes.is_empty());
        assert_eq!(profile.email, "stranger@parish.example");

        let admin = store.user_profile(" ADMIN@parish.example").await.unwrap();
        assert_eq!(admin.role, Role::Admin);
    }

    #[tokio::test]
    async fn writes_go_through_the_ledger_rules() {
        let store = MemoryStore::seeded();
        let date = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let dup = AttendanceRecord::new("C1", "陳小明", date);
        let err = store
            .insert_record(&dup, RecordMode::Create, "teacher.c1@parish.example")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEntry(_)));

        let missing = NaturalKey::new("C1", "陳小明", NaiveDate::from_ymd_opt(2020, 1, 5).unwrap());
        let err = store.update_redeem(&missing, date).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
