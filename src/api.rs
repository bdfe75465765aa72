use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LedgerError;
use crate::models::{parse_date, parse_flag, AttendanceRecord, ClassFilter, NaturalKey, RecordMode};
use crate::service::{LedgerService, RedeemRequest};
use crate::store::RowStore;

fn error_response(e: &LedgerError) -> Value {
    json!({
        "error": e.to_string(),
        "kind": e.kind(),
    })
}

fn ok() -> Value {
    json!({ "ok": true })
}

fn to_value<T: Serialize>(value: T) -> Result<Value, LedgerError> {
    serde_json::to_value(value).map_err(|e| LedgerError::validation(e.to_string()))
}

fn get_str<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| params.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn required_str<'a>(params: &'a Value, keys: &[&str]) -> Result<&'a str, LedgerError> {
    get_str(params, keys).ok_or_else(|| LedgerError::validation(format!("missing {}", keys[0])))
}

fn required_class(params: &Value) -> Result<&str, LedgerError> {
    required_str(params, &["class", "className"])
}

/// Class filter defaulting to `*` when the caller leaves it out.
fn class_filter(params: &Value) -> ClassFilter {
    ClassFilter::parse(get_str(params, &["class", "className"]).unwrap_or("*"))
}

fn required_date(params: &Value, key: &str) -> Result<NaiveDate, LedgerError> {
    let raw = required_str(params, &[key])?;
    parse_date(raw).ok_or_else(|| LedgerError::validation(format!("{key} must be YYYY-MM-DD")))
}

fn optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, LedgerError> {
    match get_str(params, &[key]) {
        None => Ok(None),
        Some(raw) => parse_date(raw)
            .map(Some)
            .ok_or_else(|| LedgerError::validation(format!("{key} must be YYYY-MM-DD"))),
    }
}

fn flag(params: &Value, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => parse_flag(s),
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        _ => false,
    }
}

fn natural_key(params: &Value) -> Result<NaturalKey, LedgerError> {
    Ok(NaturalKey::new(
        required_class(params)?,
        required_str(params, &["studentName"])?,
        required_date(params, "attendanceDate")?,
    ))
}

/// Handles one action request and always returns a JSON object: the
/// action's result, or `{"error", "kind"}`.
pub async fn handle_request<S: RowStore>(service: &LedgerService<S>, req: &Value) -> Value {
    let action = req.get("action").and_then(Value::as_str).unwrap_or("");
    debug!(action, "request");
    match dispatch(service, action, req).await {
        Ok(value) => value,
        Err(e) => error_response(&e),
    }
}

/// Parses one JSON line and handles it.
pub async fn handle_line<S: RowStore>(service: &LedgerService<S>, line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(req) if req.is_object() => handle_request(service, &req).await,
        Ok(_) => error_response(&LedgerError::validation("request must be a JSON object")),
        Err(e) => error_response(&LedgerError::validation(format!("bad json: {e}"))),
    }
}

async fn dispatch<S: RowStore>(
    service: &LedgerService<S>,
    action: &str,
    params: &Value,
) -> Result<Value, LedgerError> {
    match action {
        "getAllClasses" => to_value(service.classes().await?),
        "getStudentsByClass" => to_value(service.students_by_class(required_class(params)?).await?),
        "getAllStudents" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.all_students(&session).await?)
        }
        "getStats" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.stats(&session, &class_filter(params)).await?)
        }
        "getAchievedStudents" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.achieved_students(&session, &class_filter(params)).await?)
        }
        "getUnredeemedRecords" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.unredeemed_records(&session, &class_filter(params)).await?)
        }
        "getAttendanceDetails" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.class_details(&session, required_class(params)?).await?)
        }
        "getGlobalRedemptionStats" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.redemption_summary(&session, &class_filter(params)).await?)
        }
        "getClassBasedPendingRedemptionReport" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(service.pending_report(&session, &class_filter(params)).await?)
        }
        "recordAttendance" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            let key = natural_key(params)?;
            let mut entry = AttendanceRecord::new(&key.class, &key.student_name, key.attendance_date);
            entry.redeemed = flag(params, "redeemed");
            entry.redeem_date = optional_date(params, "redeemDate")?;
            let mode = if flag(params, "upsert") {
                RecordMode::Upsert
            } else {
                RecordMode::Create
            };
            service.record_attendance(&session, entry, mode).await?;
            Ok(ok())
        }
        "updateRedeemStatus" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            let key = natural_key(params)?;
            let redeem_date = required_date(params, "redeemDate")?;
            service
                .update_redeem_status(&session, &key, redeem_date)
                .await?;
            Ok(ok())
        }
        "batchUpdateRedeemStatus" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            let requests = batch_requests(params)?;
            let outcome = service
                .batch_update_redeem_status(&session, &requests)
                .await?;
            let mut value = to_value(outcome)?;
            value["ok"] = json!(true);
            Ok(value)
        }
        "getUserRoles" | "whoami" => {
            let session = service.session(required_str(params, &["email"])?).await?;
            to_value(session.profile)
        }
        "" => Err(LedgerError::validation("missing action")),
        other => Err(LedgerError::validation(format!("unknown action: {other}"))),
    }
}

/// Every entry must carry a full key and a redeem date, its own or the
/// batch-level one. The whole batch is rejected before any write if not.
fn batch_requests(params: &Value) -> Result<Vec<RedeemRequest>, LedgerError> {
    let default_date = optional_date(params, "redeemDate")?;
    let entries = params
        .get("records")
        .and_then(Value::as_array)
        .ok_or_else(|| LedgerError::validation("missing records"))?;
    if entries.is_empty() {
        return Err(LedgerError::validation("records is empty"));
    }

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let key = natural_key(entry)
                .map_err(|e| LedgerError::validation(format!("records[{i}]: {e}")))?;
            let redeem_date = optional_date(entry, "redeemDate")?
                .or(default_date)
                .ok_or_else(|| {
                    LedgerError::validation(format!("records[{i}]: missing redeemDate"))
                })?;
            Ok(RedeemRequest { key, redeem_date })
        })
        .collect()
}
