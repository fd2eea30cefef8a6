use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, now_rfc3339, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if first_name.is_empty() && last_name.is_empty() {
        return err(&req.id, "bad_params", "student name must not be empty", None);
    }
    for (table, id) in [
        ("classes", &class_id),
        ("sections", &section_id),
        ("sessions", &session_id),
    ] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }

    let roll_no = optional_str(req, "rollNo");
    let sort_order = match req.params.get("sortOrder").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => {
            // Append to the end of the cohort by default.
            match conn.query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students
                 WHERE class_id = ? AND section_id = ? AND session_id = ?",
                (&class_id, &section_id, &session_id),
                |r| r.get(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, section_id, session_id, first_name, last_name,
                              roll_no, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &student_id,
            &class_id,
            &section_id,
            &session_id,
            &first_name,
            &last_name,
            &roll_no,
            sort_order,
            now_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let section_id = match required_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, roll_no, active, sort_order
         FROM students
         WHERE class_id = ? AND section_id = ? AND session_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&class_id, &section_id, &session_id), |row| {
            let id: String = row.get(0)?;
            let last: String = row.get(1)?;
            let first: String = row.get(2)?;
            let roll_no: Option<String> = row.get(3)?;
            let active: i64 = row.get(4)?;
            let sort_order: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "displayName": format!("{}, {}", last, first),
                "rollNo": roll_no,
                "active": active != 0,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "students", &student_id) {
        return e;
    }

    if let Some(first) = req.params.get("firstName").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE students SET first_name = ?, updated_at = ? WHERE id = ?",
            (first.trim(), now_rfc3339(), &student_id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(last) = req.params.get("lastName").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE students SET last_name = ?, updated_at = ? WHERE id = ?",
            (last.trim(), now_rfc3339(), &student_id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(roll) = req.params.get("rollNo").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE students SET roll_no = ?, updated_at = ? WHERE id = ?",
            (roll.trim(), now_rfc3339(), &student_id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    if let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
            (active as i64, now_rfc3339(), &student_id),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "updated": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "students", &student_id) {
        return e;
    }

    // Explicit administrative delete removes the result records too.
    for sql in [
        "DELETE FROM subject_results WHERE student_id = ?",
        "DELETE FROM cocurricular_results WHERE student_id = ?",
        "DELETE FROM optional_results WHERE student_id = ?",
        "DELETE FROM fee_payments WHERE student_id = ?",
        "DELETE FROM students WHERE id = ?",
    ] {
        if let Err(e) = conn.execute(sql, [&student_id]) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
