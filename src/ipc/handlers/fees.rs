use crate::calc::{self, derive_fee, FeeStatus};
use crate::ipc::handlers::students::load_student_row;
use crate::ipc::helpers::{
    get_optional_str, get_required_f64, get_required_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FeeSummaryRow {
    id: String,
    name: String,
    category: String,
    course: String,
    total_amount: f64,
    amount_paid: f64,
}

fn fees_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let search = get_optional_str(params, "search").map(|s| s.to_lowercase());
    let status_filter = match get_optional_str(params, "status") {
        Some(raw) if raw != "All" => Some(
            FeeStatus::parse(&raw)
                .ok_or_else(|| HandlerErr::bad_params("status must be Paid, Partial or Unpaid"))?,
        ),
        _ => None,
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, name, category, course, total_fee, paid_fee
             FROM students
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(FeeSummaryRow {
                id: r.get(0)?,
                name: r.get(1)?,
                category: r.get(2)?,
                course: r.get(3)?,
                total_amount: r.get(4)?,
                amount_paid: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut total_fees = 0.0;
    let mut total_collected = 0.0;
    let mut total_pending = 0.0;
    let mut summary = Vec::new();

    for row in rows {
        let fee = derive_fee(row.total_amount, row.amount_paid);

        let matches_search = match search.as_deref() {
            Some(q) => {
                row.name.to_lowercase().contains(q)
                    || row.id.to_lowercase().contains(q)
                    || row.category.to_lowercase().contains(q)
            }
            None => true,
        };
        let matches_status = status_filter.map(|s| s == fee.status).unwrap_or(true);
        if !matches_search || !matches_status {
            continue;
        }

        total_fees += row.total_amount;
        total_collected += row.amount_paid;
        total_pending += fee.due_amount;
        summary.push(json!({
            "id": row.id,
            "name": row.name,
            "category": row.category,
            "course": row.course,
            "totalAmount": row.total_amount,
            "amountPaid": row.amount_paid,
            "amountDue": fee.due_amount,
            "status": fee.status.as_str(),
        }));
    }

    Ok(json!({
        "rows": summary,
        "totals": {
            "totalFees": total_fees,
            "totalCollected": total_collected,
            "totalPending": total_pending,
        }
    }))
}

fn fees_record_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let amount = get_required_f64(params, "amount")?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(HandlerErr::bad_params("enter a valid payment amount"));
    }
    let payment_date = get_required_str(params, "paymentDate")?;
    let payment_method = get_required_str(params, "paymentMethod")?;
    let description = get_optional_str(params, "description").unwrap_or_default();
    // Client-supplied id doubles as the idempotency key for retries.
    let payment_id =
        get_optional_str(params, "paymentId").unwrap_or_else(|| Uuid::new_v4().to_string());

    let already: Option<String> = conn
        .query_row("SELECT id FROM payments WHERE id = ?", [&payment_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if already.is_some() {
        let row = load_student_row(conn, &student_id)?
            .ok_or_else(|| HandlerErr::not_found("student not found"))?;
        let fee = derive_fee(row.total_fee, row.paid_fee);
        return Ok(json!({
            "paymentId": payment_id,
            "alreadyApplied": true,
            "paidFee": row.paid_fee,
            "dueAmount": fee.due_amount,
            "feeStatus": fee.status.as_str(),
        }));
    }

    // The balance bump and the payment log entry commit together; a crash
    // rolls back both.
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let student: Option<(String, f64, f64)> = tx
        .query_row(
            "SELECT name, total_fee, paid_fee FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((student_name, total_fee, paid_fee)) = student else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let new_paid_fee = paid_fee + amount;
    let fee = derive_fee(total_fee, new_paid_fee);

    tx.execute(
        "UPDATE students SET paid_fee = ?, last_payment = ? WHERE id = ?",
        rusqlite::params![new_paid_fee, payment_date, student_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    tx.execute(
        "INSERT INTO payments(id, student_id, student_name, amount, payment_date,
                              payment_method, description, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            payment_id,
            student_id,
            student_name,
            amount,
            payment_date,
            payment_method,
            description,
            fee.status.as_str(),
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "payments"))?;

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "paymentId": payment_id,
        "alreadyApplied": false,
        "paidFee": new_paid_fee,
        "dueAmount": fee.due_amount,
        "feeStatus": fee.status.as_str(),
    }))
}

fn fees_payments(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");

    let sql = match student_id {
        Some(_) => {
            "SELECT id, student_id, student_name, amount, payment_date, payment_method,
                    description, status
             FROM payments WHERE student_id = ?
             ORDER BY payment_date DESC, created_at DESC"
        }
        None => {
            "SELECT id, student_id, student_name, amount, payment_date, payment_method,
                    description, status
             FROM payments
             ORDER BY payment_date DESC, created_at DESC"
        }
    };
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentId": r.get::<_, String>(1)?,
            "studentName": r.get::<_, String>(2)?,
            "amount": r.get::<_, f64>(3)?,
            "paymentDate": r.get::<_, String>(4)?,
            "paymentMethod": r.get::<_, String>(5)?,
            "description": r.get::<_, String>(6)?,
            "status": r.get::<_, String>(7)?,
        }))
    };
    let payments = match student_id {
        Some(sid) => stmt
            .query_map([sid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(HandlerErr::db_query)?;

    Ok(json!({ "payments": payments }))
}

fn fees_installment_plan(
    _conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let total_fee = get_required_f64(params, "totalFee")?;
    let installments = params
        .get("installments")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing installments"))?;
    let installments = u32::try_from(installments)
        .map_err(|_| HandlerErr::bad_params("installments must be between 1 and 24"))?;
    let amounts = calc::split_installments(total_fee, installments)?;
    Ok(json!({
        "totalFee": total_fee,
        "installments": installments,
        "amounts": amounts,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.summary" => Some(with_conn(state, req, fees_summary)),
        "fees.recordPayment" => Some(with_conn(state, req, fees_record_payment)),
        "fees.payments" => Some(with_conn(state, req, fees_payments)),
        "fees.installmentPlan" => Some(with_conn(state, req, fees_installment_plan)),
        _ => None,
    }
}
