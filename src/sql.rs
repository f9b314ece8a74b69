use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{recurrence_from, validate_day_of_week};
use crate::model::*;
use crate::timegrid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProfessional {
        id: Ulid,
        name: Option<String>,
        rest_day: DayOfWeek,
    },
    UpsertWorkingHours {
        professional_id: Ulid,
        day_of_week: DayOfWeek,
        hours: WorkingHours,
    },
    InsertBlockedPeriod {
        block: BlockedPeriod,
    },
    DeleteBlockedPeriod {
        id: Ulid,
    },
    InsertAppointment {
        id: Ulid,
        professional_id: Ulid,
        start: Ms,
        end: Ms,
        client_id: Option<String>,
        service_id: Option<String>,
        origin: BookingOrigin,
    },
    ImportAppointment {
        id: Ulid,
        professional_id: Ulid,
        start: Ms,
        duration_minutes: Option<i64>,
        status: AppointmentStatus,
        client_id: Option<String>,
        service_id: Option<String>,
    },
    UpdateAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
        rating: Option<u8>,
    },
    SelectSlots {
        professional_id: Ulid,
        date: NaiveDate,
        duration_minutes: i64,
        barbershop_id: Option<String>,
    },
    SelectAppointments {
        professional_id: Ulid,
        range: Option<Period>,
    },
    SelectBlockedPeriods {
        professional_id: Ulid,
    },
    SelectWorkingHours {
        professional_id: Ulid,
    },
    SelectProfessionals,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() || trimmed.trim_matches(';').trim().is_empty() {
        return Err(SqlError::Empty);
    }
    if starts_with_keyword(trimmed, "UPDATE") {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, if `sql` is one. Used to describe result
/// columns before parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.len() > keyword.len()
        && sql[..keyword.len()].eq_ignore_ascii_case(keyword)
        && sql.as_bytes()[keyword.len()].is_ascii_whitespace()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let v = values.as_slice();

    match table.as_str() {
        "professionals" => {
            require_arity("professionals", v, 1)?;
            let rest_day = match optional(v, 2) {
                Some(e) => match parse_i64_or_null(e)? {
                    Some(d) => day_of_week(d)?,
                    None => DEFAULT_REST_DAY,
                },
                None => DEFAULT_REST_DAY,
            };
            Ok(Command::InsertProfessional {
                id: parse_ulid(&v[0])?,
                name: optional(v, 1).map(parse_string_or_null).transpose()?.flatten(),
                rest_day,
            })
        }
        "working_hours" => {
            require_arity("working_hours", v, 3)?;
            let is_working = parse_bool(&v[2])?;
            let start = optional(v, 3).map(parse_wall_clock_or_null).transpose()?.flatten();
            let end = optional(v, 4).map(parse_wall_clock_or_null).transpose()?.flatten();
            let hours = match (is_working, start, end) {
                (true, Some(start), Some(end)) => WorkingHours::open(start, end),
                (true, _, _) => {
                    return Err(SqlError::InvalidValue(
                        "start_time and end_time are required on a working day".into(),
                    ));
                }
                (false, start, end) => WorkingHours {
                    is_working: false,
                    start: start.unwrap_or(0),
                    end: end.unwrap_or(0),
                },
            };
            Ok(Command::UpsertWorkingHours {
                professional_id: parse_ulid(&v[0])?,
                day_of_week: day_of_week(parse_i64(&v[1])?)?,
                hours,
            })
        }
        "blocked_periods" => {
            require_arity("blocked_periods", v, 6)?;
            let dow = parse_i64_or_null(&v[2])?.map(day_of_week).transpose()?;
            let date = parse_string_or_null(&v[3])?
                .map(|s| timegrid::parse_date(&s))
                .transpose()
                .map_err(invalid)?;
            Ok(Command::InsertBlockedPeriod {
                block: BlockedPeriod {
                    id: parse_ulid(&v[0])?,
                    professional_id: parse_ulid(&v[1])?,
                    recurrence: recurrence_from(dow, date).map_err(invalid)?,
                    // Ordering is checked by the engine, not asserted here.
                    span: Span {
                        start: parse_wall_clock(&v[4])?,
                        end: parse_wall_clock(&v[5])?,
                    },
                    label: optional(v, 6).map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        "appointments" => {
            require_arity("appointments", v, 4)?;
            let origin = match optional(v, 6).map(parse_string_or_null).transpose()?.flatten() {
                Some(s) => BookingOrigin::parse(&s)
                    .ok_or_else(|| SqlError::InvalidValue(format!("unknown origin {s:?}")))?,
                None => BookingOrigin::Client,
            };
            let (start, end) = (parse_i64(&v[2])?, parse_i64(&v[3])?);
            if start >= end {
                return Err(SqlError::InvalidValue("end must be after start".into()));
            }
            Ok(Command::InsertAppointment {
                id: parse_ulid(&v[0])?,
                professional_id: parse_ulid(&v[1])?,
                start,
                end,
                client_id: optional(v, 4).map(parse_string_or_null).transpose()?.flatten(),
                service_id: optional(v, 5).map(parse_string_or_null).transpose()?.flatten(),
                origin,
            })
        }
        "appointment_imports" => {
            require_arity("appointment_imports", v, 5)?;
            Ok(Command::ImportAppointment {
                id: parse_ulid(&v[0])?,
                professional_id: parse_ulid(&v[1])?,
                start: parse_i64(&v[2])?,
                duration_minutes: parse_i64_or_null(&v[3])?,
                status: parse_status(&v[4])?,
                client_id: optional(v, 5).map(parse_string_or_null).transpose()?.flatten(),
                service_id: optional(v, 6).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "blocked_periods" => Ok(Command::DeleteBlockedPeriod { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `UPDATE appointments SET status = '…' [, rating = n] WHERE id = '…'`
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let perr = |e: sqlparser::parser::ParserError| SqlError::Parse(e.to_string());

    parser.expect_keyword(Keyword::UPDATE).map_err(perr)?;
    let name = parser.parse_object_name(false).map_err(perr)?;
    let table = object_name_last(&name).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    if table != "appointments" {
        return Err(SqlError::UnknownTable(table));
    }
    parser.expect_keyword(Keyword::SET).map_err(perr)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(perr)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(perr)?)
    } else {
        None
    };
    let _ = parser.consume_token(&sqlparser::tokenizer::Token::SemiColon);
    if parser.peek_token().token != sqlparser::tokenizer::Token::EOF {
        return Err(SqlError::Parse(format!(
            "unexpected input after UPDATE: {}",
            parser.peek_token().token
        )));
    }

    let (mut status, mut rating) = (None, None);
    for assignment in &assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match column.as_deref() {
            Some("status") => status = Some(parse_status(&assignment.value)?),
            Some("rating") => {
                rating = parse_i64_or_null(&assignment.value)?
                    .map(|r| {
                        u8::try_from(r)
                            .map_err(|_| SqlError::InvalidValue(format!("rating {r} out of range")))
                    })
                    .transpose()?;
            }
            Some(other) => {
                return Err(SqlError::Unsupported(format!("cannot update column {other}")));
            }
            None => return Err(SqlError::Unsupported("tuple assignment".into())),
        }
    }

    Ok(Command::UpdateAppointmentStatus {
        id: extract_where_id(&selection)?,
        status: status.ok_or(SqlError::MissingFilter("status"))?,
        rating,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let find = |column: &str, op: BinaryOperator| {
        filters
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    };
    let professional_id = || -> Result<Ulid, SqlError> {
        parse_ulid(find("professional_id", BinaryOperator::Eq).ok_or(SqlError::MissingFilter("professional_id"))?)
    };

    match table.as_str() {
        "slots" => {
            let date = parse_string(find("slot_date", BinaryOperator::Eq).ok_or(SqlError::MissingFilter("slot_date"))?)?;
            let duration = find("duration_minutes", BinaryOperator::Eq)
                .ok_or(SqlError::MissingFilter("duration_minutes"))?;
            Ok(Command::SelectSlots {
                professional_id: professional_id()?,
                date: timegrid::parse_date(&date).map_err(invalid)?,
                duration_minutes: parse_i64(duration)?,
                barbershop_id: find("barbershop_id", BinaryOperator::Eq)
                    .map(parse_string)
                    .transpose()?,
            })
        }
        "appointments" => {
            let start = find("start", BinaryOperator::GtEq).map(parse_i64).transpose()?;
            let end = find("end", BinaryOperator::LtEq).map(parse_i64).transpose()?;
            let range = match (start, end) {
                (Some(start), Some(end)) if start < end => Some(Period::new(start, end)),
                (Some(_), Some(_)) => {
                    return Err(SqlError::InvalidValue("start must be before end".into()));
                }
                (None, None) => None,
                (Some(_), None) => return Err(SqlError::MissingFilter("end")),
                (None, Some(_)) => return Err(SqlError::MissingFilter("start")),
            };
            Ok(Command::SelectAppointments {
                professional_id: professional_id()?,
                range,
            })
        }
        "blocked_periods" => Ok(Command::SelectBlockedPeriods {
            professional_id: professional_id()?,
        }),
        "working_hours" => Ok(Command::SelectWorkingHours {
            professional_id: professional_id()?,
        }),
        "professionals" => Ok(Command::SelectProfessionals),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten an AND-chain of `column <op> value` comparisons.
fn collect_filters<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            if let Some(column) = expr_column_name(left) {
                out.push((column, op.clone(), right));
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn invalid(e: crate::engine::EngineError) -> SqlError {
    SqlError::InvalidValue(e.to_string())
}

fn require_arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn optional(values: &[Expr], idx: usize) -> Option<&Expr> {
    values.get(idx)
}

fn day_of_week(d: i64) -> Result<DayOfWeek, SqlError> {
    validate_day_of_week(d).map_err(invalid)
}

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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
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
            op: BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::InvalidValue(format!("bad ULID {s:?}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::InvalidValue(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::InvalidValue(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::InvalidValue(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::InvalidValue(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_wall_clock(expr: &Expr) -> Result<Minutes, SqlError> {
    timegrid::to_minutes(&parse_string(expr)?).map_err(invalid)
}

fn parse_wall_clock_or_null(expr: &Expr) -> Result<Option<Minutes>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_wall_clock(expr).map(Some)
}

fn parse_status(expr: &Expr) -> Result<AppointmentStatus, SqlError> {
    let s = parse_string(expr)?;
    AppointmentStatus::parse(&s)
        .ok_or_else(|| SqlError::InvalidValue(format!("unknown appointment status {s:?}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    InvalidValue(String),
}

impl SqlError {
    /// Syntax problems are 42601; well-formed statements carrying bad
    /// values are 22023.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::Parse(_)
            | SqlError::Empty
            | SqlError::Unsupported(_)
            | SqlError::UnknownTable(_) => "42601",
            SqlError::WrongArity(..) | SqlError::MissingFilter(_) | SqlError::InvalidValue(_) => {
                "22023"
            }
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
