use crate::calc::{self, derive_fee};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, groups_to_json, load_student_records, parse_sort_spec,
    parse_student_filter, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub category: String,
    pub course: String,
    pub year: i64,
    pub email: String,
    pub phone: String,
    pub total_fee: f64,
    pub paid_fee: f64,
    pub installments: i64,
    pub installment_amt: Vec<f64>,
    pub installment_dates: Vec<String>,
    pub birthday: Option<String>,
    pub enrolled: bool,
    pub last_payment: Option<String>,
    pub created_at: Option<String>,
}

fn parse_json_array<T: serde::de::DeserializeOwned>(raw: &str) -> Vec<T> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub fn load_student_row(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, category, course, year, email, phone,
                total_fee, paid_fee, installments, installment_amt,
                installment_dates, birthday, enrolled, last_payment, created_at
         FROM students WHERE id = ?",
        [student_id],
        |r| {
            let amt_raw: String = r.get(10)?;
            let dates_raw: String = r.get(11)?;
            Ok(StudentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                category: r.get(2)?,
                course: r.get(3)?,
                year: r.get(4)?,
                email: r.get(5)?,
                phone: r.get(6)?,
                total_fee: r.get(7)?,
                paid_fee: r.get(8)?,
                installments: r.get(9)?,
                installment_amt: parse_json_array(&amt_raw),
                installment_dates: parse_json_array(&dates_raw),
                birthday: r.get(12)?,
                enrolled: r.get::<_, i64>(13)? != 0,
                last_payment: r.get(14)?,
                created_at: r.get(15)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

pub fn student_row_json(row: &StudentRow) -> serde_json::Value {
    let fee = derive_fee(row.total_fee, row.paid_fee);
    json!({
        "id": row.id,
        "name": row.name,
        "category": row.category,
        "course": row.course,
        "year": row.year,
        "email": row.email,
        "phone": row.phone,
        "totalFee": row.total_fee,
        "paidFee": row.paid_fee,
        "dueAmount": fee.due_amount,
        "feeStatus": fee.status.as_str(),
        "installments": row.installments,
        "installmentAmt": row.installment_amt,
        "installmentDates": row.installment_dates,
        "birthday": row.birthday,
        "enrolled": row.enrolled,
        "lastPayment": row.last_payment,
        "createdAt": row.created_at,
    })
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let filter = parse_student_filter(params);
    let sort = parse_sort_spec(params)?;

    let all = load_student_records(conn)?;
    let filtered = calc::filter_students(&all, &filter);
    let groups = calc::group_students(&filtered, sort);

    let mut students_json = Vec::with_capacity(filtered.len());
    for record in &filtered {
        let row = load_student_row(conn, &record.id)?
            .ok_or_else(|| HandlerErr::not_found("student not found"))?;
        students_json.push(student_row_json(&row));
    }

    let sort_json = sort.map(|s| {
        json!({
            "key": s.key.as_str(),
            "direction": s.direction.as_str(),
        })
    });

    Ok(json!({
        "students": students_json,
        "groups": groups_to_json(&groups),
        "sort": sort_json,
    }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let row = load_student_row(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student_row_json(&row) }))
}

fn validate_fees(total_fee: f64, installments: i64) -> Result<(f64, u32, Vec<f64>), HandlerErr> {
    if !total_fee.is_finite() || total_fee < 0.0 {
        return Err(HandlerErr::bad_params("totalFee must be non-negative"));
    }
    let installments = u32::try_from(installments)
        .map_err(|_| HandlerErr::bad_params("installments must be between 1 and 24"))?;
    let amounts = calc::split_installments(total_fee, installments)?;
    Ok((total_fee, installments, amounts))
}

fn parse_string_array(params: &serde_json::Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let category = get_required_str(params, "category")?;
    let course = get_required_str(params, "course")?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing year"))?;

    let email = get_optional_str(params, "email").unwrap_or_default();
    let phone = get_optional_str(params, "phone").unwrap_or_default();
    let total_fee = params.get("totalFee").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let installments = params
        .get("installments")
        .and_then(|v| v.as_i64())
        .unwrap_or(1);
    let (total_fee, installments, amounts) = validate_fees(total_fee, installments)?;

    let installment_dates = parse_string_array(params, "installmentDates");
    let birthday = get_optional_str(params, "birthday");
    let enrolled = params
        .get("enrolled")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO students(id, name, category, course, year, email, phone,
                              total_fee, paid_fee, installments, installment_amt,
                              installment_dates, birthday, enrolled, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            name,
            category,
            course,
            year,
            email,
            phone,
            total_fee,
            installments,
            serde_json::to_string(&amounts).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&installment_dates).unwrap_or_else(|_| "[]".to_string()),
            birthday,
            enrolled as i64,
            created_at,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    let row = load_student_row(conn, &id)?
        .ok_or_else(|| HandlerErr::not_found("student not found after insert"))?;
    Ok(json!({ "student": student_row_json(&row) }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let mut row = load_student_row(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    if let Some(name) = get_optional_str(params, "name") {
        row.name = name;
    }
    if let Some(category) = get_optional_str(params, "category") {
        row.category = category;
    }
    if let Some(course) = get_optional_str(params, "course") {
        row.course = course;
    }
    if let Some(year) = params.get("year").and_then(|v| v.as_i64()) {
        row.year = year;
    }
    if let Some(email) = get_optional_str(params, "email") {
        row.email = email;
    }
    if let Some(phone) = get_optional_str(params, "phone") {
        row.phone = phone;
    }
    if let Some(birthday) = get_optional_str(params, "birthday") {
        row.birthday = Some(birthday);
    }
    if let Some(enrolled) = params.get("enrolled").and_then(|v| v.as_bool()) {
        row.enrolled = enrolled;
    }
    if params.get("installmentDates").is_some() {
        row.installment_dates = parse_string_array(params, "installmentDates");
    }

    // Changing either split input recomputes the whole installment array.
    let fee_changed =
        params.get("totalFee").is_some() || params.get("installments").is_some();
    if let Some(total_fee) = params.get("totalFee").and_then(|v| v.as_f64()) {
        row.total_fee = total_fee;
    }
    if let Some(installments) = params.get("installments").and_then(|v| v.as_i64()) {
        row.installments = installments;
    }
    if fee_changed {
        let (total_fee, installments, amounts) = validate_fees(row.total_fee, row.installments)?;
        row.total_fee = total_fee;
        row.installments = installments as i64;
        row.installment_amt = amounts;
    }

    conn.execute(
        "UPDATE students SET name = ?, category = ?, course = ?, year = ?, email = ?,
                phone = ?, total_fee = ?, installments = ?, installment_amt = ?,
                installment_dates = ?, birthday = ?, enrolled = ?
         WHERE id = ?",
        rusqlite::params![
            row.name,
            row.category,
            row.course,
            row.year,
            row.email,
            row.phone,
            row.total_fee,
            row.installments,
            serde_json::to_string(&row.installment_amt).unwrap_or_else(|_| "[]".to_string()),
            serde_json::to_string(&row.installment_dates).unwrap_or_else(|_| "[]".to_string()),
            row.birthday,
            row.enrolled as i64,
            student_id,
        ],
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    let row = load_student_row(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found after update"))?;
    Ok(json!({ "student": student_row_json(&row) }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if load_student_row(conn, &student_id)?.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    // Payments stay behind as the audit log.
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    tx.execute("DELETE FROM performance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "performance"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
