use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{NewRental, NewReservation};
use crate::model::*;

/// An administrator's decision on a pending (or, for `Return`, approved) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
    Return,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertFacility {
        id: Ulid,
        name: String,
        slots: Vec<NaiveTime>,
        active: bool,
    },
    UpsertItem {
        id: Ulid,
        name: String,
        total: u32,
    },
    InsertReservation(NewReservation),
    /// `note` is the admin note on approve and the reason on reject.
    DecideReservation {
        id: Ulid,
        decision: Decision,
        note: Option<String>,
        admin_notes: Option<String>,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertRental(NewRental),
    DecideRental {
        id: Ulid,
        decision: Decision,
        note: Option<String>,
        admin_notes: Option<String>,
    },
    DeleteRental {
        id: Ulid,
    },
    SelectReservations(ReservationFilter),
    SelectRentals(RentalFilter),
    SelectAvailability {
        facility_id: Ulid,
        date: NaiveDate,
    },
    SelectFreeWindows {
        facility_id: Ulid,
        date: NaiveDate,
    },
    SelectStock {
        item_id: Ulid,
    },
    SelectFacilities,
    SelectItems,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "facilities" => {
            arity("facilities", &values, 3)?;
            let active = match values.get(3) {
                Some(v) => parse_bool(v)?,
                None => true,
            };
            Ok(Command::UpsertFacility {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                slots: parse_slots(&values[2])?,
                active,
            })
        }
        "items" => {
            arity("items", &values, 3)?;
            Ok(Command::UpsertItem {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                total: parse_u32(&values[2])?,
            })
        }
        "reservations" => {
            arity("reservations", &values, 5)?;
            let participants = match values.get(6) {
                Some(v) => parse_u32(v)?,
                None => 1,
            };
            Ok(Command::InsertReservation(NewReservation {
                id: parse_ulid(&values[0])?,
                facility_id: parse_ulid(&values[1])?,
                date: parse_date_expr(&values[2])?,
                start: parse_time(&values[3])?,
                end: parse_time(&values[4])?,
                purpose: optional_string(values.get(5))?.unwrap_or_default(),
                participants,
                contact: optional_string(values.get(7))?.unwrap_or_default(),
            }))
        }
        "rentals" => {
            arity("rentals", &values, 5)?;
            Ok(Command::InsertRental(NewRental {
                id: parse_ulid(&values[0])?,
                item_id: parse_ulid(&values[1])?,
                quantity: parse_u32(&values[2])?,
                rental_date: parse_date_expr(&values[3])?,
                return_date: parse_date_expr(&values[4])?,
                purpose: optional_string(values.get(5))?.unwrap_or_default(),
            }))
        }
        "reservation_decisions" => {
            arity("reservation_decisions", &values, 2)?;
            let decision = parse_decision(&values[1])?;
            if decision == Decision::Return {
                return Err(SqlError::Parse("reservations cannot be returned".into()));
            }
            Ok(Command::DecideReservation {
                id: parse_ulid(&values[0])?,
                decision,
                note: optional_string(values.get(2))?,
                admin_notes: optional_string(values.get(3))?,
            })
        }
        "rental_decisions" => {
            arity("rental_decisions", &values, 2)?;
            Ok(Command::DecideRental {
                id: parse_ulid(&values[0])?,
                decision: parse_decision(&values[1])?,
                note: optional_string(values.get(2))?,
                admin_notes: optional_string(values.get(3))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation { id }),
        "rentals" => Ok(Command::DeleteRental { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "reservations" => {
            let mut filter = ReservationFilter::default();
            for (col, value) in filters {
                match col.as_str() {
                    "facility_id" => filter.facility_id = Some(parse_ulid(value)?),
                    "date" => filter.date = Some(parse_date_expr(value)?),
                    "status" => {
                        let s = parse_string(value)?;
                        filter.status =
                            Some(ReservationStatus::parse(&s).ok_or(SqlError::Parse(format!("bad status: {s}")))?);
                    }
                    "requester_id" => filter.requester_id = Some(parse_string(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectReservations(filter))
        }
        "rentals" => {
            let mut filter = RentalFilter::default();
            for (col, value) in filters {
                match col.as_str() {
                    "item_id" => filter.item_id = Some(parse_ulid(value)?),
                    "status" => {
                        let s = parse_string(value)?;
                        filter.status =
                            Some(RentalStatus::parse(&s).ok_or(SqlError::Parse(format!("bad status: {s}")))?);
                    }
                    "requester_id" => filter.requester_id = Some(parse_string(value)?),
                    "overdue_as_of" => filter.overdue_as_of = Some(parse_date_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectRentals(filter))
        }
        "availability" | "free_windows" => {
            let (mut facility_id, mut date) = (None, None);
            for (col, value) in filters {
                match col.as_str() {
                    "facility_id" => facility_id = Some(parse_ulid(value)?),
                    "date" => date = Some(parse_date_expr(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            let facility_id = facility_id.ok_or(SqlError::MissingFilter("facility_id"))?;
            let date = date.ok_or(SqlError::MissingFilter("date"))?;
            if table == "availability" {
                Ok(Command::SelectAvailability { facility_id, date })
            } else {
                Ok(Command::SelectFreeWindows { facility_id, date })
            }
        }
        "stock" => {
            let mut item_id = None;
            for (col, value) in filters {
                match col.as_str() {
                    "item_id" => item_id = Some(parse_ulid(value)?),
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectStock {
                item_id: item_id.ok_or(SqlError::MissingFilter("item_id"))?,
            })
        }
        "facilities" => Ok(Command::SelectFacilities),
        "items" => Ok(Command::SelectItems),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Absent column or `NULL` → `None`.
fn optional_string(expr: Option<&Expr>) -> Result<Option<String>, SqlError> {
    match expr {
        None => Ok(None),
        Some(e) if matches!(extract_value(e), Some(Value::Null)) => Ok(None),
        Some(e) => parse_string(e).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?}, expected YYYY-MM-DD")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    parse_slot(&s).ok_or_else(|| SqlError::Parse(format!("bad time {s:?}, expected HH:MM")))
}

/// `'09:00,09:30,10:00'` → slot labels.
fn parse_slots(expr: &Expr) -> Result<Vec<NaiveTime>, SqlError> {
    let s = parse_string(expr)?;
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_slot(part).ok_or_else(|| SqlError::Parse(format!("bad time slot {part:?}"))))
        .collect()
}

fn parse_decision(expr: &Expr) -> Result<Decision, SqlError> {
    let s = parse_string(expr)?;
    match s.trim().to_ascii_lowercase().as_str() {
        "approve" | "approved" => Ok(Decision::Approve),
        "reject" | "rejected" => Ok(Decision::Reject),
        "return" | "returned" => Ok(Decision::Return),
        _ => Err(SqlError::Parse(format!("bad decision {s:?}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_i64(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const F: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const R: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        parse_slot(s).unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_upsert_facility() {
        let sql = format!("INSERT INTO facilities (id, name, slots, active) VALUES ('{F}', 'Gym', '14:00, 14:30,15:00', false)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpsertFacility {
                id: ulid(F),
                name: "Gym".into(),
                slots: vec![t("14:00"), t("14:30"), t("15:00")],
                active: false,
            }
        );
    }

    #[test]
    fn facility_active_defaults_true() {
        let sql = format!("INSERT INTO facilities (id, name, slots) VALUES ('{F}', 'Gym', '09:00,10:00')");
        match parse_sql(&sql).unwrap() {
            Command::UpsertFacility { active, .. } => assert!(active),
            cmd => panic!("expected UpsertFacility, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_upsert_item() {
        let sql = format!("INSERT INTO items (id, name, total) VALUES ('{F}', 'Tent', 5)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpsertItem {
                id: ulid(F),
                name: "Tent".into(),
                total: 5
            }
        );
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, facility_id, date, start_time, end_time, purpose, participants, contact) \
             VALUES ('{R}', '{F}', '2025-03-01', '14:00', '15:00', 'club meeting', 12, 'x@example.org')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation(NewReservation {
                id: ulid(R),
                facility_id: ulid(F),
                date: d("2025-03-01"),
                start: t("14:00"),
                end: t("15:00"),
                purpose: "club meeting".into(),
                participants: 12,
                contact: "x@example.org".into(),
            })
        );
    }

    #[test]
    fn reservation_optional_columns_default() {
        let sql = format!(
            "INSERT INTO reservations (id, facility_id, date, start_time, end_time) VALUES ('{R}', '{F}', '2025-03-01', '14:00', '15:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation(req) => {
                assert_eq!(req.participants, 1);
                assert!(req.purpose.is_empty());
                assert!(req.contact.is_empty());
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_rental() {
        let sql = format!(
            "INSERT INTO rentals (id, item_id, quantity, rental_date, return_date, purpose) VALUES ('{R}', '{F}', 3, '2025-04-01', '2025-04-03', 'camp')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRental(NewRental {
                id: ulid(R),
                item_id: ulid(F),
                quantity: 3,
                rental_date: d("2025-04-01"),
                return_date: d("2025-04-03"),
                purpose: "camp".into(),
            })
        );
    }

    #[test]
    fn parse_decisions() {
        let sql = format!("INSERT INTO reservation_decisions (id, decision, note) VALUES ('{R}', 'reject', 'room closed')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DecideReservation {
                id: ulid(R),
                decision: Decision::Reject,
                note: Some("room closed".into()),
                admin_notes: None,
            }
        );

        let sql = format!("INSERT INTO rental_decisions (id, decision) VALUES ('{R}', 'RETURN')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DecideRental {
                id: ulid(R),
                decision: Decision::Return,
                note: None,
                admin_notes: None,
            }
        );

        let sql = format!("INSERT INTO rental_decisions (id, decision, note) VALUES ('{R}', 'approve', NULL)");
        match parse_sql(&sql).unwrap() {
            Command::DecideRental { decision, note, .. } => {
                assert_eq!(decision, Decision::Approve);
                assert_eq!(note, None);
            }
            cmd => panic!("expected DecideRental, got {cmd:?}"),
        }
    }

    #[test]
    fn reservations_cannot_be_returned() {
        let sql = format!("INSERT INTO reservation_decisions (id, decision) VALUES ('{R}', 'return')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO reservation_decisions (id, decision) VALUES ('{R}', 'maybe')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM reservations WHERE id = '{R}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteReservation { id: ulid(R) });
        let sql = format!("DELETE FROM rentals WHERE id = '{R}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::DeleteRental { id: ulid(R) });
        assert!(matches!(
            parse_sql("DELETE FROM rentals"),
            Err(SqlError::MissingFilter("id"))
        ));
        let sql = format!("DELETE FROM items WHERE id = '{R}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_select_reservations_with_filters() {
        let sql = format!("SELECT * FROM reservations WHERE facility_id = '{F}' AND date = '2025-03-01' AND status = 'pending'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectReservations(ReservationFilter {
                facility_id: Some(ulid(F)),
                date: Some(d("2025-03-01")),
                status: Some(ReservationStatus::Pending),
                requester_id: None,
            })
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations(ReservationFilter::default())
        );
    }

    #[test]
    fn parse_select_rentals_overdue() {
        let sql = "SELECT * FROM rentals WHERE requester_id = 'alice' AND overdue_as_of = '2025-04-10'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectRentals(RentalFilter {
                requester_id: Some("alice".into()),
                overdue_as_of: Some(d("2025-04-10")),
                ..Default::default()
            })
        );
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!("SELECT * FROM availability WHERE facility_id = '{F}' AND date = '2025-03-01'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                facility_id: ulid(F),
                date: d("2025-03-01")
            }
        );
        let sql = format!("SELECT * FROM free_windows WHERE date = '2025-03-01' AND facility_id = '{F}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectFreeWindows { .. }));
        let sql = format!("SELECT * FROM availability WHERE facility_id = '{F}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn parse_select_stock_and_catalog() {
        let sql = format!("SELECT * FROM stock WHERE item_id = '{F}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectStock { item_id: ulid(F) });
        assert_eq!(parse_sql("SELECT * FROM facilities").unwrap(), Command::SelectFacilities);
        assert_eq!(parse_sql("select name from items").unwrap(), Command::SelectItems);
    }

    #[test]
    fn unknown_filter_column_errors() {
        let sql = "SELECT * FROM reservations WHERE colour = 'red'";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "colour"));
        let sql = "SELECT * FROM reservations WHERE participants > 3";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn bad_values_error() {
        let sql = format!("INSERT INTO reservations (id, facility_id, date, start_time, end_time) VALUES ('{R}', '{F}', '03/01/2025', '14:00', '15:00')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO items (id, name, total) VALUES ('{F}', 'Tent', -1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = "INSERT INTO items (id, name, total) VALUES ('nope', 'Tent', 1)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO items (id, name) VALUES ('{F}', 'Tent')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("items", 3, 2))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(parse_sql("SELECT * FROM nope"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(parse_sql("").is_err());
    }
}
