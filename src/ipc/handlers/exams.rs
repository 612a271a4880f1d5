use crate::calc::result_percentage;
use crate::ipc::helpers::{
    get_optional_str, get_required_f64, get_required_i64, get_required_str, load_student_records,
    with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn exams_schedule(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let date = get_required_str(params, "date")?;
    let category = get_required_str(params, "category")?;
    let course = get_required_str(params, "course")?;
    let year = get_required_i64(params, "year")?;
    let subject = get_required_str(params, "subject")?;
    let marks = get_required_f64(params, "marks")?;
    if !marks.is_finite() || marks <= 0.0 {
        return Err(HandlerErr::bad_params("marks must be positive"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, name, date, category, course, year, subject, marks)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![id, name, date, category, course, year, subject, marks],
    )
    .map_err(|e| HandlerErr::db_update(e, "exams"))?;

    Ok(json!({ "examId": id }))
}

fn exam_row_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
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
}

fn exams_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, date, category, course, year, subject, marks
             FROM exams ORDER BY date, name",
        )
        .map_err(HandlerErr::db_query)?;
    let exams = stmt
        .query_map([], exam_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "exams": exams }))
}

fn exams_record_results(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_name = get_required_str(params, "examName")?;
    let total_marks = get_required_f64(params, "totalMarks")?;
    if !total_marks.is_finite() || total_marks <= 0.0 {
        return Err(HandlerErr::bad_params("invalid total marks"));
    }
    let date = get_optional_str(params, "date")
        .unwrap_or_else(|| Utc::now().date_naive().to_string());

    let category = get_optional_str(params, "category").filter(|c| c != "All");
    let course = get_optional_str(params, "course").filter(|c| c != "All");
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .filter(|y| *y != 0);

    let Some(marks_obj) = params.get("marks").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing marks"));
    };

    let all = load_student_records(conn)?;
    let targeted: Vec<_> = all
        .iter()
        .filter(|s| {
            category.as_deref().map(|c| s.category == c).unwrap_or(true)
                && course.as_deref().map(|c| s.course == c).unwrap_or(true)
                && year.map(|y| s.year == y).unwrap_or(true)
        })
        .collect();
    if targeted.is_empty() {
        return Err(HandlerErr::bad_params(
            "no students found for selected filters",
        ));
    }

    // Validate the whole batch before touching the table.
    let mut resolved = Vec::with_capacity(targeted.len());
    for student in &targeted {
        let marks = marks_obj
            .get(&student.id)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("please enter marks for student {}", student.name))
            })?;
        if !marks.is_finite() || marks < 0.0 || marks > total_marks {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("invalid marks for student {}", student.name),
                details: Some(json!({ "studentId": student.id, "marks": marks })),
            });
        }
        resolved.push((*student, marks));
    }

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (student, marks) in &resolved {
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO performance(id, exam_name, student_id, student_name,
                                     student_category, date, marks, total_marks, percentage)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                id,
                exam_name,
                student.id,
                student.name,
                student.category,
                date,
                marks,
                total_marks,
                result_percentage(*marks, total_marks),
            ],
        )
        .map_err(|e| HandlerErr::db_update(e, "performance"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "recorded": resolved.len() }))
}

fn performance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let search = get_optional_str(params, "search").map(|s| s.to_lowercase());
    let category = get_optional_str(params, "category").filter(|c| c != "All");

    let mut stmt = conn
        .prepare(
            "SELECT id, exam_name, student_id, student_name, student_category,
                    date, marks, total_marks, percentage
             FROM performance
             ORDER BY date DESC, exam_name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                json!({
                    "id": r.get::<_, String>(0)?,
                    "examName": r.get::<_, String>(1)?,
                    "studentId": r.get::<_, String>(2)?,
                    "studentName": r.get::<_, String>(3)?,
                    "studentCategory": r.get::<_, String>(4)?,
                    "date": r.get::<_, String>(5)?,
                    "marks": r.get::<_, f64>(6)?,
                    "totalMarks": r.get::<_, f64>(7)?,
                    "percentage": r.get::<_, f64>(8)?,
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let results: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|(student_name, student_category, _)| {
            let matches_search = search
                .as_deref()
                .map(|q| student_name.to_lowercase().contains(q))
                .unwrap_or(true);
            let matches_category = category
                .as_deref()
                .map(|c| student_category == c)
                .unwrap_or(true);
            matches_search && matches_category
        })
        .map(|(_, _, row)| row)
        .collect();

    Ok(json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.schedule" => Some(with_conn(state, req, exams_schedule)),
        "exams.list" => Some(with_conn(state, req, exams_list)),
        "exams.recordResults" => Some(with_conn(state, req, exams_record_results)),
        "performance.list" => Some(with_conn(state, req, performance_list)),
        _ => None,
    }
}
