use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::ledger;
use crate::models::{
    normalize_email, AttendanceRecord, BatchFailure, BatchOutcome, ClassFilter, ClassPending,
    LedgerStats, NaturalKey, RecordMode, RedemptionSummary, Role, StudentAggregate, StudentRef,
    UserProfile,
};
use crate::store::RowStore;

/// Who is asking. Resolved once per request and handed to every query.
#[derive(Debug, Clone)]
pub struct Session {
    pub email: String,
    pub profile: UserProfile,
}

impl Session {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            email: profile.email.clone(),
            profile,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.profile.role == Role::Admin
    }

    pub fn can_access(&self, class: &str) -> bool {
        self.is_admin() || self.profile.classes.iter().any(|c| c == class)
    }

    /// Admins may ask for anything. Teachers may ask for their own classes,
    /// and `*` narrows to those classes.
    pub fn authorize(&self, filter: &ClassFilter) -> Result<(), LedgerError> {
        if self.is_admin() {
            return Ok(());
        }
        if self.profile.classes.is_empty() {
            return Err(LedgerError::Forbidden(format!(
                "{} has no classes assigned",
                self.email
            )));
        }
        match filter {
            ClassFilter::All => Ok(()),
            ClassFilter::Class(class) if self.can_access(class) => Ok(()),
            ClassFilter::Class(class) => Err(LedgerError::Forbidden(format!(
                "{} may not access class {class}",
                self.email
            ))),
        }
    }
}

/// One entry of a batch redemption; each entry may carry its own date.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub key: NaturalKey,
    pub redeem_date: NaiveDate,
}

pub struct LedgerService<S> {
    store: S,
    threshold: usize,
}

impl<S: RowStore> LedgerService<S> {
    pub fn new(store: S, threshold: usize) -> Self {
        Self { store, threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn session(&self, email: &str) -> Result<Session, LedgerError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(LedgerError::validation("email is required"));
        }
        let profile = self.store.user_profile(&email).await?;
        Ok(Session::new(profile))
    }

    /// Fetches the rows the session may see for `filter`.
    pub async fn visible_records(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        session.authorize(filter)?;
        let mut records = self.store.fetch_records(filter).await?;
        if !session.is_admin() {
            records.retain(|r| session.can_access(&r.class));
        }
        debug!(email = %session.email, %filter, rows = records.len(), "snapshot");
        Ok(records)
    }

    pub async fn classes(&self) -> Result<Vec<String>, LedgerError> {
        self.store.list_classes().await
    }

    pub async fn students_by_class(&self, class: &str) -> Result<Vec<StudentRef>, LedgerError> {
        let class = class.trim();
        if class.is_empty() {
            return Err(LedgerError::validation("class is required"));
        }
        self.store.list_students(&ClassFilter::parse(class)).await
    }

    pub async fn all_students(&self, session: &Session) -> Result<Vec<StudentRef>, LedgerError> {
        session.authorize(&ClassFilter::All)?;
        let mut students = self.store.list_students(&ClassFilter::All).await?;
        students.retain(|s| session.can_access(&s.class));
        Ok(students)
    }

    pub async fn stats(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<LedgerStats, LedgerError> {
        let records = self.visible_records(session, filter).await?;
        Ok(ledger::compute_stats(&records, filter, self.threshold))
    }

    pub async fn achieved_students(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<Vec<StudentAggregate>, LedgerError> {
        let records = self.visible_records(session, filter).await?;
        Ok(ledger::achieved_students(&records, filter, self.threshold))
    }

    pub async fn unredeemed_records(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let records = self.visible_records(session, filter).await?;
        Ok(ledger::unredeemed_records(&records))
    }

    pub async fn class_details(
        &self,
        session: &Session,
        class: &str,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let filter = ClassFilter::parse(class);
        if filter == ClassFilter::All {
            return Err(LedgerError::validation("details need a single class"));
        }
        let records = self.visible_records(session, &filter).await?;
        Ok(ledger::class_details(&records, class.trim()))
    }

    pub async fn redemption_summary(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<RedemptionSummary, LedgerError> {
        let records = self.visible_records(session, filter).await?;
        Ok(ledger::redemption_summary(&records, filter))
    }

    pub async fn pending_report(
        &self,
        session: &Session,
        filter: &ClassFilter,
    ) -> Result<Vec<ClassPending>, LedgerError> {
        let records = self.visible_records(session, filter).await?;
        Ok(ledger::pending_by_class(&records, filter))
    }

    pub async fn record_attendance(
        &self,
        session: &Session,
        entry: AttendanceRecord,
        mode: RecordMode,
    ) -> Result<(), LedgerError> {
        let entry = ledger::validate_entry(entry)?;
        session.authorize(&ClassFilter::Class(entry.class.clone()))?;

        self.store
            .register_student(&StudentRef::new(&entry.student_name, &entry.class))
            .await?;
        self.store
            .insert_record(&entry, mode, &session.email)
            .await?;

        info!(key = %entry.key(), redeemed = entry.redeemed, by = %session.email, "attendance recorded");
        Ok(())
    }

    pub async fn update_redeem_status(
        &self,
        session: &Session,
        key: &NaturalKey,
        redeem_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        session.authorize(&ClassFilter::Class(key.class.clone()))?;
        self.store.update_redeem(key, redeem_date).await?;
        info!(%key, %redeem_date, by = %session.email, "redeem status updated");
        Ok(())
    }

    /// Applies each update in order, one store round trip per entry.
    ///
    /// Missing or forbidden keys are collected as failures and the batch
    /// moves on. A store outage stops the batch; updates already issued stay
    /// applied.
    pub async fn batch_update_redeem_status(
        &self,
        session: &Session,
        requests: &[RedeemRequest],
    ) -> Result<BatchOutcome, LedgerError> {
        let mut outcome = BatchOutcome::default();

        for request in requests {
            match self
                .update_redeem_status(session, &request.key, request.redeem_date)
                .await
            {
                Ok(()) => outcome.applied_count += 1,
                Err(e @ (LedgerError::NotFound(_) | LedgerError::Forbidden(_))) => {
                    warn!(key = %request.key, "batch entry skipped: {e}");
                    outcome.failed.push(BatchFailure {
                        key: request.key.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(LedgerError::UpstreamUnavailable(message)) => {
                    return Err(LedgerError::UpstreamUnavailable(format!(
                        "{message} (batch stopped after {} applied)",
                        outcome.applied_count
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            applied = outcome.applied_count,
            failed = outcome.failed.len(),
            by = %session.email,
            "batch redeem finished"
        );
        Ok(outcome)
    }
}
