use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Entry-time clamp: obtained marks can never exceed the component's full
/// marks, and never go negative.
fn clamp_obtained(obtained: f64, full: f64) -> f64 {
    obtained.clamp(0.0, full.max(0.0))
}

/// Six full-marks defaults for a (class, session), from the admin-configured
/// marks distribution. Falls back to the built-in 40/10 split when the
/// administrator has not configured one yet.
fn distribution_defaults(
    conn: &Connection,
    class_id: &str,
    session_id: &str,
) -> Result<[f64; 6], rusqlite::Error> {
    let row: Option<[f64; 6]> = conn
        .query_row(
            "SELECT first_summative_full, first_formative_full,
                    second_summative_full, second_formative_full,
                    third_summative_full, third_formative_full
             FROM marks_distribution WHERE class_id = ? AND session_id = ?",
            (class_id, session_id),
            |r| {
                Ok([
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ])
            },
        )
        .optional()?;
    Ok(row.unwrap_or([40.0, 10.0, 40.0, 10.0, 40.0, 10.0]))
}

fn student_class(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<String, serde_json::Value> {
    conn.query_row(
        "SELECT class_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?
    .ok_or_else(|| err(&req.id, "not_found", "student not found", None))
}

fn term_component(
    req: &Request,
    term_key: &str,
    component: &str,
    default_full: f64,
) -> Result<(f64, f64), serde_json::Value> {
    let term = req.params.get("terms").and_then(|t| t.get(term_key));
    let obtained = term
        .and_then(|t| t.get(format!("{}Obtained", component)))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let full = term
        .and_then(|t| t.get(format!("{}Full", component)))
        .and_then(|v| v.as_f64())
        .unwrap_or(default_full);
    if full < 0.0 || obtained < 0.0 {
        return Err(err(
            &req.id,
            "bad_params",
            "marks must not be negative",
            Some(json!({ "term": term_key, "component": component })),
        ));
    }
    Ok((clamp_obtained(obtained, full), full))
}

fn handle_save_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id) in [("subjects", &subject_id), ("sessions", &session_id)] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }
    let class_id = match student_class(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let defaults = match distribution_defaults(conn, &class_id, &session_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // [(summative obtained, full), (formative obtained, full)] per term.
    let mut cells: Vec<(f64, f64)> = Vec::with_capacity(6);
    for (i, term_key) in ["first", "second", "third"].iter().enumerate() {
        for (j, component) in ["summative", "formative"].iter().enumerate() {
            match term_component(req, term_key, component, defaults[i * 2 + j]) {
                Ok(v) => cells.push(v),
                Err(e) => return e,
            }
        }
    }

    let result = conn.execute(
        "INSERT INTO subject_results(
            id, student_id, subject_id, session_id,
            first_summative_obtained, first_summative_full,
            first_formative_obtained, first_formative_full,
            second_summative_obtained, second_summative_full,
            second_formative_obtained, second_formative_full,
            third_summative_obtained, third_summative_full,
            third_formative_obtained, third_formative_full,
            updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(student_id, subject_id, session_id) DO UPDATE SET
            first_summative_obtained = excluded.first_summative_obtained,
            first_summative_full = excluded.first_summative_full,
            first_formative_obtained = excluded.first_formative_obtained,
            first_formative_full = excluded.first_formative_full,
            second_summative_obtained = excluded.second_summative_obtained,
            second_summative_full = excluded.second_summative_full,
            second_formative_obtained = excluded.second_formative_obtained,
            second_formative_full = excluded.second_formative_full,
            third_summative_obtained = excluded.third_summative_obtained,
            third_summative_full = excluded.third_summative_full,
            third_formative_obtained = excluded.third_formative_obtained,
            third_formative_full = excluded.third_formative_full,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            session_id,
            cells[0].0,
            cells[0].1,
            cells[1].0,
            cells[1].1,
            cells[2].0,
            cells[2].1,
            cells[3].0,
            cells[3].1,
            cells[4].0,
            cells[4].1,
            cells[5].0,
            cells[5].1,
            now_rfc3339(),
        ],
    );
    if let Err(e) = result {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subject_results" })),
        );
    }

    let total_obtained: f64 = cells.iter().map(|c| c.0).sum();
    let total_full: f64 = cells.iter().map(|c| c.1).sum();
    let grade = crate::grades::Scale::Overall
        .grade_for(crate::calc::percent_of(total_obtained, total_full));
    ok(
        &req.id,
        json!({
            "totalMarks": total_obtained,
            "totalFullMarks": total_full,
            "grade": grade.as_str()
        }),
    )
}

/// One term slot of a co-curricular save: numeric marks or a letter grade,
/// never both, or absent entirely.
fn cocurricular_term(
    req: &Request,
    term_key: &str,
    full_marks: f64,
) -> Result<(Option<f64>, Option<String>), serde_json::Value> {
    let Some(term) = req.params.get("terms").and_then(|t| t.get(term_key)) else {
        return Ok((None, None));
    };
    let marks = term.get("marks").and_then(|v| v.as_f64());
    let grade = term
        .get("grade")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if marks.is_some() && grade.is_some() {
        return Err(err(
            &req.id,
            "bad_params",
            "a term may carry marks or a grade, not both",
            Some(json!({ "term": term_key })),
        ));
    }
    if let Some(m) = marks {
        if m < 0.0 {
            return Err(err(
                &req.id,
                "bad_params",
                "marks must not be negative",
                Some(json!({ "term": term_key })),
            ));
        }
        return Ok((Some(clamp_obtained(m, full_marks)), None));
    }
    Ok((None, grade))
}

fn subject_full_marks(
    conn: &Connection,
    req: &Request,
    subject_id: &str,
) -> Result<f64, serde_json::Value> {
    // Per-request override wins; otherwise the subject-level configured value.
    if let Some(v) = req.params.get("fullMarks").and_then(|v| v.as_f64()) {
        if v <= 0.0 {
            return Err(err(
                &req.id,
                "bad_params",
                "fullMarks must be positive",
                Some(json!({ "fullMarks": v })),
            ));
        }
        return Ok(v);
    }
    conn.query_row(
        "SELECT full_marks FROM subjects WHERE id = ?",
        [subject_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?
    .ok_or_else(|| err(&req.id, "not_found", "subject not found", None))
}

fn handle_save_cocurricular(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id) in [
        ("students", &student_id),
        ("subjects", &subject_id),
        ("sessions", &session_id),
    ] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }
    let full_marks = match subject_full_marks(conn, req, &subject_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut terms: Vec<(Option<f64>, Option<String>)> = Vec::with_capacity(3);
    for term_key in ["first", "second", "final"] {
        match cocurricular_term(req, term_key, full_marks) {
            Ok(v) => terms.push(v),
            Err(e) => return e,
        }
    }

    let result = conn.execute(
        "INSERT INTO cocurricular_results(
            id, student_id, subject_id, session_id,
            first_term_marks, first_term_grade,
            second_term_marks, second_term_grade,
            final_term_marks, final_term_grade,
            full_marks, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(student_id, subject_id, session_id) DO UPDATE SET
            first_term_marks = excluded.first_term_marks,
            first_term_grade = excluded.first_term_grade,
            second_term_marks = excluded.second_term_marks,
            second_term_grade = excluded.second_term_grade,
            final_term_marks = excluded.final_term_marks,
            final_term_grade = excluded.final_term_grade,
            full_marks = excluded.full_marks,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            session_id,
            terms[0].0,
            terms[0].1,
            terms[1].0,
            terms[1].1,
            terms[2].0,
            terms[2].1,
            full_marks,
            now_rfc3339(),
        ],
    );
    if let Err(e) = result {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "cocurricular_results" })),
        );
    }
    ok(&req.id, json!({ "saved": true, "fullMarks": full_marks }))
}

fn handle_save_optional(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id) in [
        ("students", &student_id),
        ("subjects", &subject_id),
        ("sessions", &session_id),
    ] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }
    let full_marks = match subject_full_marks(conn, req, &subject_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let obtained = req
        .params
        .get("obtainedMarks")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    if obtained < 0.0 {
        return err(&req.id, "bad_params", "marks must not be negative", None);
    }
    let obtained = clamp_obtained(obtained, full_marks);

    let result = conn.execute(
        "INSERT INTO optional_results(
            id, student_id, subject_id, session_id, obtained_marks, full_marks, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(student_id, subject_id, session_id) DO UPDATE SET
            obtained_marks = excluded.obtained_marks,
            full_marks = excluded.full_marks,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            session_id,
            obtained,
            full_marks,
            now_rfc3339(),
        ],
    );
    if let Err(e) = result {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "optional_results" })),
        );
    }

    let grade = crate::grades::Scale::Cocurricular
        .grade_for(crate::calc::percent_of(obtained, full_marks));
    ok(
        &req.id,
        json!({
            "obtainedMarks": obtained,
            "fullMarks": full_marks,
            "grade": grade.as_str()
        }),
    )
}

fn handle_list_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT r.subject_id, s.name,
                r.first_summative_obtained, r.first_summative_full,
                r.first_formative_obtained, r.first_formative_full,
                r.second_summative_obtained, r.second_summative_full,
                r.second_formative_obtained, r.second_formative_full,
                r.third_summative_obtained, r.third_summative_full,
                r.third_formative_obtained, r.third_formative_full
         FROM subject_results r
         JOIN subjects s ON s.id = r.subject_id
         WHERE r.student_id = ? AND r.session_id = ?
         ORDER BY s.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&student_id, &session_id), |row| {
            let subject_id: String = row.get(0)?;
            let subject_name: String = row.get(1)?;
            let mut obtained = 0.0_f64;
            let mut full = 0.0_f64;
            let mut terms = serde_json::Map::new();
            for (i, term_key) in ["first", "second", "third"].iter().enumerate() {
                let so: f64 = row.get(2 + i * 4)?;
                let sf: f64 = row.get(3 + i * 4)?;
                let fo: f64 = row.get(4 + i * 4)?;
                let ff: f64 = row.get(5 + i * 4)?;
                obtained += so + fo;
                full += sf + ff;
                terms.insert(
                    term_key.to_string(),
                    json!({
                        "summativeObtained": so,
                        "summativeFull": sf,
                        "formativeObtained": fo,
                        "formativeFull": ff
                    }),
                );
            }
            let grade = crate::grades::Scale::Overall
                .grade_for(crate::calc::percent_of(obtained, full));
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "terms": terms,
                "totalMarks": obtained,
                "totalFullMarks": full,
                "grade": grade.as_str()
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_cocurricular(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT r.subject_id, s.name,
                r.first_term_marks, r.first_term_grade,
                r.second_term_marks, r.second_term_grade,
                r.final_term_marks, r.final_term_grade,
                r.full_marks
         FROM cocurricular_results r
         JOIN subjects s ON s.id = r.subject_id
         WHERE r.student_id = ? AND r.session_id = ?
         ORDER BY s.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&student_id, &session_id), |row| {
            let subject_id: String = row.get(0)?;
            let subject_name: String = row.get(1)?;
            let full_marks: f64 = row.get(8)?;
            let mut terms = serde_json::Map::new();
            for (i, term_key) in ["first", "second", "final"].iter().enumerate() {
                let marks: Option<f64> = row.get(2 + i * 2)?;
                let grade: Option<String> = row.get(3 + i * 2)?;
                terms.insert(
                    term_key.to_string(),
                    json!({ "marks": marks, "grade": grade }),
                );
            }
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "terms": terms,
                "fullMarks": full_marks
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_list_optional(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT r.subject_id, s.name, r.obtained_marks, r.full_marks
         FROM optional_results r
         JOIN subjects s ON s.id = r.subject_id
         WHERE r.student_id = ? AND r.session_id = ?
         ORDER BY s.sort_order, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&student_id, &session_id), |row| {
            let subject_id: String = row.get(0)?;
            let subject_name: String = row.get(1)?;
            let obtained: f64 = row.get(2)?;
            let full: f64 = row.get(3)?;
            let grade = crate::grades::Scale::Cocurricular
                .grade_for(crate::calc::percent_of(obtained, full));
            Ok(json!({
                "subjectId": subject_id,
                "subjectName": subject_name,
                "obtainedMarks": obtained,
                "fullMarks": full,
                "grade": grade.as_str()
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete(state: &mut AppState, req: &Request, table: &str) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!(
        "DELETE FROM {} WHERE student_id = ? AND subject_id = ? AND session_id = ?",
        table
    );
    match conn.execute(&sql, (&student_id, &subject_id, &session_id)) {
        Ok(n) => ok(&req.id, json!({ "deleted": n > 0 })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.saveSubject" => Some(handle_save_subject(state, req)),
        "results.saveCocurricular" => Some(handle_save_cocurricular(state, req)),
        "results.saveOptional" => Some(handle_save_optional(state, req)),
        "results.listSubject" => Some(handle_list_subject(state, req)),
        "results.listCocurricular" => Some(handle_list_cocurricular(state, req)),
        "results.listOptional" => Some(handle_list_optional(state, req)),
        "results.deleteSubject" => Some(handle_delete(state, req, "subject_results")),
        "results.deleteCocurricular" => Some(handle_delete(state, req, "cocurricular_results")),
        "results.deleteOptional" => Some(handle_delete(state, req, "optional_results")),
        _ => None,
    }
}
