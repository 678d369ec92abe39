use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::ReservationInput;

/// Columns a reservation write accepts, in the order an INSERT without a
/// column list binds them.
pub const RESERVATION_COLUMNS: [&str; 5] =
    ["email", "first_name", "last_name", "arrival_date", "departure_date"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        input: ReservationInput,
    },
    /// Full replacement: every column must be assigned.
    UpdateReservation {
        id: Ulid,
        input: ReservationInput,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        id: Option<Ulid>,
    },
    /// `[start, end)`; either bound may be left to the caller's default.
    SelectAvailability {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Virtual tables a statement can return rows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    Reservations,
    Availability,
}

/// Which table's rows a statement returns, judged from its shape alone so
/// unbound `$N` placeholders need no values. `None` for statements without rows.
pub fn row_source(sql: &str) -> Option<RowSource> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let (table, readable) = match stmts.first()? {
        Statement::Insert(insert) => (insert_table_name(insert).ok()?, false),
        Statement::Update { table, .. } => (table_factor_name(&table.relation).ok()?, false),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => (table_factor_name(&select.from.first()?.relation).ok()?, true),
            _ => return None,
        },
        _ => return None,
    };
    match table.as_str() {
        "reservations" => Some(RowSource::Reservations),
        "availability" if readable => Some(RowSource::Availability),
        _ => None,
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        RESERVATION_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity("reservations", columns.len(), values.len()));
    }

    let mut input = ReservationInput::default();
    for (column, value) in columns.iter().zip(&values) {
        set_column(&mut input, column, value)?;
    }
    Ok(Command::InsertReservation { input })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "reservations" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut input = ReservationInput::default();
    let mut assigned = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set_column(&mut input, &column, &assignment.value)?;
        assigned.push(column);
    }
    for column in RESERVATION_COLUMNS {
        if !assigned.iter().any(|c| c == column) {
            return Err(SqlError::MissingColumn(column));
        }
    }
    Ok(Command::UpdateReservation { id, input })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteReservation { id })
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

    match table.as_str() {
        "reservations" => {
            let id = match &select.selection {
                Some(_) => Some(extract_where_id(&select.selection)?),
                None => None,
            };
            Ok(Command::SelectReservations { id })
        }
        "availability" => {
            let (mut start, mut end) = (None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability { start, end })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    start: &mut Option<NaiveDate>,
    end: &mut Option<NaiveDate>,
) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Err(SqlError::Unsupported(format!("filter {expr}")));
    };
    let column = expr_column_name(left);
    match (op, column.as_deref()) {
        (ast::BinaryOperator::And, _) => {
            extract_availability_filters(left, start, end)?;
            extract_availability_filters(right, start, end)?;
        }
        (ast::BinaryOperator::GtEq, Some("start")) => *start = Some(parse_date_expr(right)?),
        // The window end is exclusive; `<=` names the last date to include.
        (ast::BinaryOperator::Lt, Some("end")) => *end = Some(parse_date_expr(right)?),
        (ast::BinaryOperator::LtEq, Some("end")) => {
            let last = parse_date_expr(right)?;
            let after = last
                .succ_opt()
                .ok_or_else(|| SqlError::Parse(format!("date out of range: {last}")))?;
            *end = Some(after);
        }
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
    Ok(())
}

fn set_column(input: &mut ReservationInput, column: &str, value: &Expr) -> Result<(), SqlError> {
    match column {
        "email" => input.email = parse_string_or_null(value)?,
        "first_name" => input.first_name = parse_string_or_null(value)?,
        "last_name" => input.last_name = parse_string_or_null(value)?,
        "arrival_date" => input.arrival_date = parse_date_or_null(value)?,
        "departure_date" => input.departure_date = parse_date_or_null(value)?,
        other => return Err(SqlError::UnknownColumn(other.to_string())),
    }
    Ok(())
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
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    parse_string_or_null(expr)?.as_deref().map(parse_date).transpose()
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    parse_date_or_null(expr)?.ok_or_else(|| SqlError::Parse("date filter cannot be NULL".into()))
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
    MissingColumn(&'static str),
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
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
