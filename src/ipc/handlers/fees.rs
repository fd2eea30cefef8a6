use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_row_exists, now_rfc3339, optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_create_head(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    if amount <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "amount must be positive",
            Some(json!({ "amount": amount })),
        );
    }
    for (table, id) in [("classes", &class_id), ("sessions", &session_id)] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }

    let head_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_heads(id, class_id, session_id, name, amount) VALUES(?, ?, ?, ?, ?)",
        (&head_id, &class_id, &session_id, &name, amount),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_heads" })),
        );
    }
    ok(&req.id, json!({ "feeHeadId": head_id, "name": name }))
}

fn handle_list_heads(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT h.id, h.name, h.amount,
                (SELECT COALESCE(SUM(p.amount), 0) FROM fee_payments p
                 WHERE p.fee_head_id = h.id) AS collected
         FROM fee_heads h
         WHERE h.class_id = ? AND h.session_id = ?
         ORDER BY h.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&class_id, &session_id), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let amount: f64 = row.get(2)?;
            let collected: f64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "amount": amount,
                "collected": collected
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(heads) => ok(&req.id, json!({ "feeHeads": heads })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_delete_head(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let head_id = match required_str(req, "feeHeadId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_row_exists(conn, req, "fee_heads", &head_id) {
        return e;
    }

    let payment_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM fee_payments WHERE fee_head_id = ?",
        [&head_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if payment_count > 0 {
        return err(
            &req.id,
            "bad_params",
            "fee head has recorded payments",
            Some(json!({ "paymentCount": payment_count })),
        );
    }

    match conn.execute("DELETE FROM fee_heads WHERE id = ?", [&head_id]) {
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_record_payment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let head_id = match required_str(req, "feeHeadId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let amount = match required_f64(req, "amount") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if amount <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "amount must be positive",
            Some(json!({ "amount": amount })),
        );
    }
    for (table, id) in [("fee_heads", &head_id), ("students", &student_id)] {
        if let Err(e) = ensure_row_exists(conn, req, table, id) {
            return e;
        }
    }
    let method = optional_str(req, "method");
    let paid_on = optional_str(req, "paidOn").unwrap_or_else(now_rfc3339);

    let payment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO fee_payments(id, fee_head_id, student_id, amount, method, paid_on)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&payment_id, &head_id, &student_id, amount, &method, &paid_on),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "fee_payments" })),
        );
    }
    ok(&req.id, json!({ "paymentId": payment_id }))
}

/// Per-student statement: every fee head for the student's class/session
/// with amount due, paid so far, and the remaining balance.
fn handle_student_statement(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT h.id, h.name, h.amount,
                (SELECT COALESCE(SUM(p.amount), 0) FROM fee_payments p
                 WHERE p.fee_head_id = h.id AND p.student_id = s.id) AS paid
         FROM fee_heads h
         JOIN students s ON s.class_id = h.class_id AND s.session_id = h.session_id
         WHERE s.id = ?
         ORDER BY h.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut total_due = 0.0_f64;
    let mut total_paid = 0.0_f64;
    let rows = stmt
        .query_map([&student_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let amount: f64 = row.get(2)?;
            let paid: f64 = row.get(3)?;
            Ok((id, name, amount, paid))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let heads: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, name, amount, paid)| {
            total_due += amount;
            total_paid += paid;
            json!({
                "feeHeadId": id,
                "name": name,
                "amount": amount,
                "paid": paid,
                "balance": amount - paid
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "heads": heads,
            "totalDue": total_due,
            "totalPaid": total_paid,
            "balance": total_due - total_paid
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.createHead" => Some(handle_create_head(state, req)),
        "fees.listHeads" => Some(handle_list_heads(state, req)),
        "fees.deleteHead" => Some(handle_delete_head(state, req)),
        "fees.recordPayment" => Some(handle_record_payment(state, req)),
        "fees.studentStatement" => Some(handle_student_statement(state, req)),
        _ => None,
    }
}
