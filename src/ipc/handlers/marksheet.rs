use crate::calc::{
    self, CocurricularMarks, OptionalMarks, StudentIdentity, StudentSummary, SubjectMarks,
    TermEntry, TermMarks,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::marksheet::{self, SchoolMeta};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

struct HandlerErr {
    code: &'static str,
    message: String,
}

impl HandlerErr {
    fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, None)
    }
}

struct CohortKey {
    session_id: String,
    class_id: String,
    section_id: String,
}

fn cohort_key(req: &Request) -> Result<CohortKey, serde_json::Value> {
    Ok(CohortKey {
        session_id: required_str(req, "sessionId")?,
        class_id: required_str(req, "classId")?,
        section_id: required_str(req, "sectionId")?,
    })
}

fn term_entry(marks: Option<f64>, grade: Option<String>) -> Option<TermEntry> {
    // Numeric wins when a legacy row somehow carries both.
    match (marks, grade) {
        (Some(m), _) => Some(TermEntry::Numeric(m)),
        (None, Some(g)) if !g.trim().is_empty() => Some(TermEntry::Lettered(g)),
        _ => None,
    }
}

fn load_subject_marks(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<Vec<SubjectMarks>, HandlerErr> {
    let mut stmt = conn
        .prepare(
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
        )
        .map_err(HandlerErr::db)?;
    let term = |row: &rusqlite::Row<'_>, base: usize| -> Result<TermMarks, rusqlite::Error> {
        Ok(TermMarks {
            summative_obtained: row.get(base)?,
            summative_full: row.get(base + 1)?,
            formative_obtained: row.get(base + 2)?,
            formative_full: row.get(base + 3)?,
        })
    };
    stmt.query_map((student_id, session_id), |row| {
        Ok(SubjectMarks {
            subject_id: row.get(0)?,
            subject_name: row.get(1)?,
            first: term(row, 2)?,
            second: term(row, 6)?,
            third: term(row, 10)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_cocurricular_marks(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<Vec<CocurricularMarks>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.subject_id, s.name,
                    r.first_term_marks, r.first_term_grade,
                    r.second_term_marks, r.second_term_grade,
                    r.final_term_marks, r.final_term_grade,
                    r.full_marks
             FROM cocurricular_results r
             JOIN subjects s ON s.id = r.subject_id
             WHERE r.student_id = ? AND r.session_id = ?
             ORDER BY s.sort_order, s.name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map((student_id, session_id), |row| {
        Ok(CocurricularMarks {
            subject_id: row.get(0)?,
            subject_name: row.get(1)?,
            first_term: term_entry(row.get(2)?, row.get(3)?),
            second_term: term_entry(row.get(4)?, row.get(5)?),
            final_term: term_entry(row.get(6)?, row.get(7)?),
            full_marks: row.get(8)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

fn load_optional_marks(
    conn: &Connection,
    student_id: &str,
    session_id: &str,
) -> Result<Vec<OptionalMarks>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT r.subject_id, s.name, r.obtained_marks, r.full_marks
             FROM optional_results r
             JOIN subjects s ON s.id = r.subject_id
             WHERE r.student_id = ? AND r.session_id = ?
             ORDER BY s.sort_order, s.name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map((student_id, session_id), |row| {
        Ok(OptionalMarks {
            subject_id: row.get(0)?,
            subject_name: row.get(1)?,
            obtained_marks: row.get(2)?,
            full_marks: row.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

/// Aggregate and rank the whole cohort. Ranking always covers every active
/// student in the (session, class, section); any selection for printing is
/// applied by the caller afterwards so positions never shift.
fn load_ranked_cohort(
    conn: &Connection,
    key: &CohortKey,
) -> Result<Vec<StudentSummary>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, roll_no
             FROM students
             WHERE session_id = ? AND class_id = ? AND section_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    let students: Vec<StudentIdentity> = stmt
        .query_map(
            (&key.session_id, &key.class_id, &key.section_id),
            |row| {
                let last: String = row.get(1)?;
                let first: String = row.get(2)?;
                Ok(StudentIdentity {
                    student_id: row.get(0)?,
                    display_name: format!("{}, {}", last, first),
                    roll_no: row.get(3)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    let mut summaries = Vec::with_capacity(students.len());
    for student in students {
        let subjects = load_subject_marks(conn, &student.student_id, &key.session_id)?;
        let cocurricular = load_cocurricular_marks(conn, &student.student_id, &key.session_id)?;
        let optional = load_optional_marks(conn, &student.student_id, &key.session_id)?;
        summaries.push(calc::aggregate(student, &subjects, &cocurricular, &optional));
    }
    calc::rank(&mut summaries);
    Ok(summaries)
}

fn load_school_meta(
    conn: &Connection,
    req: &Request,
    key: &CohortKey,
) -> Result<SchoolMeta, HandlerErr> {
    let name_of = |table: &str, id: &str| -> Result<Option<String>, HandlerErr> {
        let sql = format!("SELECT name FROM {} WHERE id = ?", table);
        conn.query_row(&sql, [id], |r| r.get(0))
            .optional()
            .map_err(HandlerErr::db)
    };
    let not_found = |what: &str| HandlerErr {
        code: "not_found",
        message: format!("{} not found", what),
    };

    let session_name = name_of("sessions", &key.session_id)?.ok_or_else(|| not_found("session"))?;
    let class_name = name_of("classes", &key.class_id)?.ok_or_else(|| not_found("class"))?;
    let section_name = name_of("sections", &key.section_id)?.ok_or_else(|| not_found("section"))?;

    let total_school_days: Option<i64> = conn
        .query_row(
            "SELECT total_school_days FROM school_settings WHERE session_id = ?",
            [&key.session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?
        .flatten();

    Ok(SchoolMeta {
        school_name: req
            .params
            .get("schoolName")
            .and_then(|v| v.as_str())
            .unwrap_or("School")
            .to_string(),
        school_address: req
            .params
            .get("schoolAddress")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        session_name,
        class_name,
        section_name,
        total_school_days,
    })
}

fn handle_class_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match cohort_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let summaries = match load_ranked_cohort(conn, &key) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    ok(
        &req.id,
        json!({
            "students": summaries,
            "cohortSize": summaries.len()
        }),
    )
}

fn handle_render(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match cohort_key(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Optional selection: absent means bulk (whole cohort); a list (one
    // entry for a single marksheet, several for an explicit selection)
    // filters the ranked cohort without touching positions.
    let selection: Option<HashSet<String>> = match req.params.get("studentIds") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(arr) = v.as_array() else {
                return err(&req.id, "bad_params", "studentIds must be an array", None);
            };
            let mut ids = HashSet::new();
            for item in arr {
                let Some(s) = item.as_str() else {
                    return err(&req.id, "bad_params", "studentIds must be strings", None);
                };
                ids.insert(s.to_string());
            }
            Some(ids)
        }
    };

    let summaries = match load_ranked_cohort(conn, &key) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let school = match load_school_meta(conn, req, &key) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let pages: Vec<&StudentSummary> = summaries
        .iter()
        .filter(|s| {
            selection
                .as_ref()
                .map(|ids| ids.contains(&s.student.student_id))
                .unwrap_or(true)
        })
        .collect();
    if let Some(ids) = &selection {
        if pages.len() != ids.len() {
            let known: HashSet<&String> = pages.iter().map(|s| &s.student.student_id).collect();
            let missing: Vec<&String> = ids.iter().filter(|id| !known.contains(id)).collect();
            return err(
                &req.id,
                "not_found",
                "some selected students are not in this cohort",
                Some(json!({ "studentIds": missing })),
            );
        }
    }

    let html = marksheet::render(&pages, &school);
    ok(
        &req.id,
        json!({
            "html": html,
            "pageCount": pages.len(),
            "cohortSize": summaries.len()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marksheet.classSummary" => Some(handle_class_summary(state, req)),
        "marksheet.render" => Some(handle_render(state, req)),
        _ => None,
    }
}
