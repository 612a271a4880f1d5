use crate::calc::{
    self, CalcError, SortDirection, SortKey, SortSpec, StudentFilter, StudentRecord,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn db_query(e: impl std::fmt::Display) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: impl std::fmt::Display, table: &str) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        // Calc errors only ever carry validation codes.
        HandlerErr {
            code: "bad_params",
            message: e.message,
            details: e.details,
        }
    }
}

pub fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Filter values of "All" (or year 0) mean "no filter", matching the
/// original screens' default dropdown state.
pub fn parse_student_filter(params: &serde_json::Value) -> StudentFilter {
    let category = get_optional_str(params, "category").filter(|c| c != "All");
    let course = get_optional_str(params, "course").filter(|c| c != "All");
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .filter(|y| *y != 0);
    StudentFilter {
        search: get_optional_str(params, "search"),
        category,
        course,
        year,
    }
}

pub fn parse_sort_spec(params: &serde_json::Value) -> Result<Option<SortSpec>, HandlerErr> {
    let Some(key_raw) = get_optional_str(params, "sortKey") else {
        return Ok(None);
    };
    let key = SortKey::parse(&key_raw).ok_or_else(|| {
        HandlerErr::bad_params("sortKey must be one of: category, course, year, name")
    })?;
    let direction = match get_optional_str(params, "sortDirection") {
        Some(raw) => SortDirection::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("sortDirection must be asc or desc"))?,
        // No explicit direction: treat this as a fresh header click.
        None => return Ok(Some(calc::toggle_sort(None, key))),
    };
    Ok(Some(SortSpec { key, direction }))
}

pub fn load_student_records(conn: &Connection) -> Result<Vec<StudentRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, category, course, year, email
             FROM students
             ORDER BY created_at, id",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([], |r| {
        Ok(StudentRecord {
            id: r.get(0)?,
            name: r.get(1)?,
            category: r.get(2)?,
            course: r.get(3)?,
            year: r.get(4)?,
            email: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

pub fn groups_to_json(groups: &[calc::CategoryGroup]) -> serde_json::Value {
    let out: Vec<serde_json::Value> = groups
        .iter()
        .map(|g| {
            json!({
                "category": g.category,
                "courses": g.courses.iter().map(|c| {
                    json!({
                        "course": c.course,
                        "years": c.years.iter().map(|y| {
                            json!({
                                "year": y.year,
                                "students": y.students.iter().map(|s| {
                                    json!({
                                        "id": s.id,
                                        "name": s.name,
                                        "year": s.year,
                                        "email": s.email,
                                    })
                                }).collect::<Vec<_>>()
                            })
                        }).collect::<Vec<_>>()
                    })
                }).collect::<Vec<_>>()
            })
        })
        .collect();
    serde_json::Value::Array(out)
}
