use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

const DISTRIBUTION_KEYS: [(&str, &str); 6] = [
    ("firstSummativeFull", "first_summative_full"),
    ("firstFormativeFull", "first_formative_full"),
    ("secondSummativeFull", "second_summative_full"),
    ("secondFormativeFull", "second_formative_full"),
    ("thirdSummativeFull", "third_summative_full"),
    ("thirdFormativeFull", "third_formative_full"),
];

fn handle_marks_distribution_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<[f64; 6]> = match conn
        .query_row(
            "SELECT first_summative_full, first_formative_full,
                    second_summative_full, second_formative_full,
                    third_summative_full, third_formative_full
             FROM marks_distribution WHERE class_id = ? AND session_id = ?",
            (&class_id, &session_id),
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
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let values = row.unwrap_or([40.0, 10.0, 40.0, 10.0, 40.0, 10.0]);
    let mut out = serde_json::Map::new();
    for (i, (camel, _)) in DISTRIBUTION_KEYS.iter().enumerate() {
        out.insert(camel.to_string(), json!(values[i]));
    }
    out.insert("configured".to_string(), json!(row.is_some()));
    ok(&req.id, serde_json::Value::Object(out))
}

fn handle_marks_distribution_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id) in [("classes", &class_id), ("sessions", &session_id)] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }

    let mut values = [0.0_f64; 6];
    for (i, (camel, _)) in DISTRIBUTION_KEYS.iter().enumerate() {
        let v = match required_f64(req, camel) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if v <= 0.0 {
            return err(
                &req.id,
                "bad_params",
                "full marks must be positive",
                Some(json!({ "field": camel, "value": v })),
            );
        }
        values[i] = v;
    }

    let result = conn.execute(
        "INSERT INTO marks_distribution(
            class_id, session_id,
            first_summative_full, first_formative_full,
            second_summative_full, second_formative_full,
            third_summative_full, third_formative_full)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(class_id, session_id) DO UPDATE SET
            first_summative_full = excluded.first_summative_full,
            first_formative_full = excluded.first_formative_full,
            second_summative_full = excluded.second_summative_full,
            second_formative_full = excluded.second_formative_full,
            third_summative_full = excluded.third_summative_full,
            third_formative_full = excluded.third_formative_full",
        rusqlite::params![
            class_id, session_id, values[0], values[1], values[2], values[3], values[4],
            values[5],
        ],
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "saved": true })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "marks_distribution" })),
        ),
    }
}

fn handle_school_days_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let days: Option<Option<i64>> = match conn
        .query_row(
            "SELECT total_school_days FROM school_settings WHERE session_id = ?",
            [&session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "totalSchoolDays": days.flatten() }),
    )
}

fn handle_school_days_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "sessions", &session_id) {
        return e;
    }
    let days = match req.params.get("totalSchoolDays").and_then(|v| v.as_i64()) {
        Some(v) if v > 0 => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "totalSchoolDays must be a positive integer",
                None,
            )
        }
    };

    let result = conn.execute(
        "INSERT INTO school_settings(session_id, total_school_days) VALUES(?, ?)
         ON CONFLICT(session_id) DO UPDATE SET
            total_school_days = excluded.total_school_days",
        (&session_id, days),
    );
    match result {
        Ok(_) => ok(&req.id, json!({ "saved": true, "totalSchoolDays": days })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "school_settings" })),
        ),
    }
}

fn handle_subject_full_marks_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_marks = match required_f64(req, "fullMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if full_marks <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "fullMarks must be positive",
            Some(json!({ "fullMarks": full_marks })),
        );
    }
    if let Err(e) = ensure_row_exists(conn, req, "subjects", &subject_id) {
        return e;
    }

    match conn.execute(
        "UPDATE subjects SET full_marks = ? WHERE id = ?",
        (full_marks, &subject_id),
    ) {
        Ok(_) => ok(&req.id, json!({ "saved": true, "fullMarks": full_marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.marksDistributionGet" => Some(handle_marks_distribution_get(state, req)),
        "setup.marksDistributionSet" => Some(handle_marks_distribution_set(state, req)),
        "setup.schoolDaysGet" => Some(handle_school_days_get(state, req)),
        "setup.schoolDaysSet" => Some(handle_school_days_set(state, req)),
        "setup.subjectFullMarksSet" => Some(handle_subject_full_marks_set(state, req)),
        _ => None,
    }
}
