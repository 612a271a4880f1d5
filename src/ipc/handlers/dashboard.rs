use crate::calc::derive_fee;
use crate::ipc::handlers::students::{load_student_row, student_row_json};
use crate::ipc::helpers::{get_optional_str, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde_json::json;

fn parse_today(params: &serde_json::Value) -> Result<NaiveDate, HandlerErr> {
    match get_optional_str(params, "today") {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map_err(|_| HandlerErr::bad_params("today must be YYYY-MM-DD")),
        None => Ok(Local::now().date_naive()),
    }
}

fn parse_limit(params: &serde_json::Value, default: i64) -> i64 {
    params
        .get("limit")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

fn dashboard_stats(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT total_fee, paid_fee FROM students")
        .map_err(HandlerErr::db_query)?;
    let fees = stmt
        .query_map([], |r| Ok((r.get::<_, f64>(0)?, r.get::<_, f64>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let total_students = fees.len();
    let mut total_fees = 0.0;
    let mut total_collected = 0.0;
    let mut total_pending = 0.0;
    for (total, paid) in fees {
        let fee = derive_fee(total, paid);
        total_fees += total.max(0.0);
        total_collected += paid.max(0.0);
        total_pending += fee.due_amount;
    }

    Ok(json!({
        "totalStudents": total_students,
        "totalFees": total_fees,
        "totalCollected": total_collected,
        "totalPending": total_pending,
    }))
}

fn dashboard_recent_payments(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let limit = parse_limit(params, 5);
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, student_name, amount, payment_date, payment_method, status
             FROM payments
             ORDER BY payment_date DESC, created_at DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::db_query)?;
    let payments = stmt
        .query_map([limit], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "amount": r.get::<_, f64>(3)?,
                "paymentDate": r.get::<_, String>(4)?,
                "paymentMethod": r.get::<_, String>(5)?,
                "status": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "payments": payments }))
}

fn dashboard_upcoming_exams(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = parse_today(params)?;
    let limit = parse_limit(params, 5);

    let mut stmt = conn
        .prepare(
            "SELECT id, name, date, category, course, year, subject, marks
             FROM exams
             WHERE date >= ?
             ORDER BY date, name
             LIMIT ?",
        )
        .map_err(HandlerErr::db_query)?;
    let exams = stmt
        .query_map(rusqlite::params![today.to_string(), limit], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "date": r.get::<_, String>(2)?,
                "category": r.get::<_, String>(3)?,
                "course": r.get::<_, String>(4)?,
                "year": r.get::<_, i64>(5)?,
                "subject": r.get::<_, String>(6)?,
                "marks": r.get::<_, f64>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let today_str = today.to_string();
    let exam_today = exams
        .iter()
        .find(|e| e.get("date").and_then(|v| v.as_str()) == Some(today_str.as_str()))
        .cloned();

    Ok(json!({ "exams": exams, "examToday": exam_today }))
}

fn dashboard_due_reminders(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = parse_today(params)?;
    let month_prefix = today.format("%Y-%m").to_string();

    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE enrolled = 1 ORDER BY created_at, id")
        .map_err(HandlerErr::db_query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut due = Vec::new();
    for id in ids {
        let Some(row) = load_student_row(conn, &id)? else {
            continue;
        };
        let fee = derive_fee(row.total_fee, row.paid_fee);
        if fee.due_amount <= 0.0 {
            continue;
        }
        let installment_this_month = row
            .installment_dates
            .iter()
            .any(|d| d.starts_with(&month_prefix));
        if !installment_this_month {
            continue;
        }
        due.push(json!({
            "id": row.id,
            "name": row.name,
            "dueAmount": fee.due_amount,
            "paidFee": row.paid_fee,
            "installmentDates": row.installment_dates,
        }));
    }

    Ok(json!({ "students": due }))
}

fn dashboard_birthdays(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let today = parse_today(params)?;
    // Match on the MM-DD slice so the birth year is irrelevant.
    let month_day = today.format("%m-%d").to_string();

    let mut stmt = conn
        .prepare(
            "SELECT id FROM students WHERE birthday IS NOT NULL ORDER BY created_at, id",
        )
        .map_err(HandlerErr::db_query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut students = Vec::new();
    for id in ids {
        let Some(row) = load_student_row(conn, &id)? else {
            continue;
        };
        let Some(birthday) = row.birthday.as_deref() else {
            continue;
        };
        if birthday.get(5..10) == Some(month_day.as_str()) {
            students.push(student_row_json(&row));
        }
    }

    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(with_conn(state, req, dashboard_stats)),
        "dashboard.recentPayments" => Some(with_conn(state, req, dashboard_recent_payments)),
        "dashboard.upcomingExams" => Some(with_conn(state, req, dashboard_upcoming_exams)),
        "dashboard.dueReminders" => Some(with_conn(state, req, dashboard_due_reminders)),
        "dashboard.birthdays" => Some(with_conn(state, req, dashboard_birthdays)),
        _ => None,
    }
}
