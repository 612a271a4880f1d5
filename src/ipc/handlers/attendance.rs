use crate::calc::{
    self, AttendanceRow, AttendanceStatus,
};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, groups_to_json, load_student_records, parse_sort_spec,
    parse_student_filter, student_exists, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be Present or Absent"))
}

fn parse_iso_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn load_month_rows(
    conn: &Connection,
    year: i32,
    month: u32,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let (first, last) = calc::month_bounds(year, month)
        .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;
    let mut stmt = conn
        .prepare(
            "SELECT student_id, date, status
             FROM attendance
             WHERE date >= ? AND date <= ?",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map(
            [first.to_string(), last.to_string()],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut rows = Vec::with_capacity(raw.len());
    for (student_id, date, status) in raw {
        let Ok(date) = NaiveDate::parse_from_str(&date, "%Y-%m-%d") else {
            continue;
        };
        let Some(status) = AttendanceStatus::parse(&status) else {
            continue;
        };
        rows.push(AttendanceRow {
            student_id,
            date,
            status,
        });
    }
    Ok(rows)
}

fn attendance_month_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let month_key = get_required_str(params, "month")?;
    let (year, month) = calc::parse_month_key(&month_key)?;
    let days = calc::days_in_month(year, month);

    let filter = parse_student_filter(params);
    let sort = parse_sort_spec(params)?;
    let all = load_student_records(conn)?;
    let filtered = calc::filter_students(&all, &filter);
    let groups = calc::group_students(&filtered, sort);

    let rows = load_month_rows(conn, year, month)?;
    let map = calc::month_attendance_map(&rows);

    // Absent days are omitted; readers treat missing entries as Absent.
    let mut rows_json = serde_json::Map::new();
    for student in &filtered {
        let Some(days_map) = map.get(&student.id) else {
            continue;
        };
        let mut day_obj = serde_json::Map::new();
        let mut days_sorted: Vec<_> = days_map.iter().collect();
        days_sorted.sort_by_key(|(day, _)| **day);
        for (day, status) in days_sorted {
            day_obj.insert(day.to_string(), json!(status.as_str()));
        }
        rows_json.insert(student.id.clone(), serde_json::Value::Object(day_obj));
    }

    Ok(json!({
        "month": month_key,
        "daysInMonth": days,
        "rows": rows_json,
        "groups": groups_to_json(&groups),
    }))
}

fn attendance_mark(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = parse_iso_date(&get_required_str(params, "date")?)?;
    let status = parse_status(&get_required_str(params, "status")?)?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO attendance(student_id, date, status)
         VALUES(?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           status = excluded.status",
        rusqlite::params![student_id, date.to_string(), status.as_str()],
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance"))?;

    Ok(json!({ "ok": true }))
}

fn attendance_save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let month_key = get_required_str(params, "month")?;
    let (year, month) = calc::parse_month_key(&month_key)?;
    let days = calc::days_in_month(year, month);

    let Some(marks) = params.get("marks").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut saved = 0usize;
    for mark in marks {
        let student_id = get_required_str(mark, "studentId")?;
        let day = mark
            .get("day")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| HandlerErr::bad_params("missing day"))? as u32;
        if day == 0 || day > days {
            return Err(HandlerErr::bad_params("day out of range for month"));
        }
        let status = parse_status(&get_required_str(mark, "status")?)?;

        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| HandlerErr::bad_params("day out of range for month"))?;

        if !student_exists(&*tx, &student_id)? {
            continue;
        }
        tx.execute(
            "INSERT INTO attendance(student_id, date, status)
             VALUES(?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status",
            rusqlite::params![student_id, date.to_string(), status.as_str()],
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
        saved += 1;
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "saved": saved }))
}

fn attendance_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let month_key = get_required_str(params, "month")?;
    let (year, month) = calc::parse_month_key(&month_key)?;
    let days = calc::days_in_month(year, month);
    let category = get_optional_str(params, "category").filter(|c| c != "All");

    let students = load_student_records(conn)?;
    let rows = load_month_rows(conn, year, month)?;
    let map = calc::month_attendance_map(&rows);

    let summary = calc::attendance_summary(&students, &map, days, category.as_deref());
    let summary_json: Vec<serde_json::Value> = summary
        .iter()
        .map(|(category, s)| {
            json!({
                "category": category,
                "studentCount": s.student_count,
                "presentCount": s.present_count,
                "averageAttendance": s.average_attendance,
            })
        })
        .collect();

    Ok(json!({
        "month": month_key,
        "daysInMonth": days,
        "categories": summary_json,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.monthOpen" => Some(with_conn(state, req, attendance_month_open)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.save" => Some(with_conn(state, req, attendance_save)),
        "attendance.summary" => Some(with_conn(state, req, attendance_summary)),
        _ => None,
    }
}
