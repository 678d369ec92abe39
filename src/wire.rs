use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Months;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;

use crate::engine::{ReservationError, ReservationService, WalStore, today};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, RowSource};

pub type Service = ReservationService<WalStore>;

pub struct CampsiteHandler {
    service: Arc<Service>,
    query_parser: Arc<CampsiteQueryParser>,
}

impl CampsiteHandler {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            query_parser: Arc::new(CampsiteQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result.map_err(reservation_err)
    }

    async fn execute_command(&self, cmd: Command) -> Result<Vec<Response>, ReservationError> {
        let service = &self.service;
        match cmd {
            Command::InsertReservation { input } => {
                service.validate_input(&input)?;
                let created = service.create(input.into_new()?).await?;
                Ok(vec![reservation_rows(vec![created])])
            }
            Command::UpdateReservation { id, input } => {
                service.validate_input(&input)?;
                let updated = service.update(id, input.into_new()?).await?;
                Ok(vec![reservation_rows(vec![updated])])
            }
            Command::DeleteReservation { id } => {
                service.delete(id).await?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectReservations { id: Some(id) } => {
                let reservation = service.get(id).await?;
                Ok(vec![reservation_rows(vec![reservation])])
            }
            Command::SelectReservations { id: None } => {
                Ok(vec![reservation_rows(service.list().await?)])
            }
            Command::SelectAvailability { start, end } => {
                let start = start.unwrap_or_else(today);
                let end = match end {
                    Some(end) => end,
                    None => start
                        .checked_add_months(Months::new(1))
                        .ok_or(ReservationError::LimitExceeded("date out of range"))?,
                };
                service.validate_window(start, end)?;
                let free = service.free_dates(start, end).await?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = free
                    .into_iter()
                    .map(|date| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn reservation_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    vec![
        text("id"),
        text("email"),
        text("first_name"),
        text("last_name"),
        text("arrival_date"),
        text("departure_date"),
        FieldInfo::new("version".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "date".into(),
        None,
        None,
        Type::VARCHAR,
        FieldFormat::Text,
    )]
}

/// Row description for a statement, decided from its parsed shape.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::row_source(sql) {
        Some(RowSource::Reservations) => reservation_schema(),
        Some(RowSource::Availability) => availability_schema(),
        None => vec![],
    }
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.guest_email)?;
            encoder.encode_field(&r.first_name)?;
            encoder.encode_field(&r.last_name)?;
            encoder.encode_field(&r.arrival_date.to_string())?;
            encoder.encode_field(&r.departure_date.to_string())?;
            encoder.encode_field(&(r.version as i64))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

#[async_trait]
impl SimpleQueryHandler for CampsiteHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CampsiteQueryParser;

#[async_trait]
impl QueryParser for CampsiteQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CampsiteHandler {
    type Statement = String;
    type QueryParser = CampsiteQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// A run of statement text or one `$N` placeholder.
#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` into text and `$N` placeholders. A `$` inside a quoted literal
/// or identifier is text.
fn pieces(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which reads the same.
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'$' => {
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n @ 1..) = sql[i + 1..end].parse::<usize>() {
                    out.push(Piece::Text(&sql[text_start..i]));
                    out.push(Piece::Param(n));
                    text_start = end;
                }
                i = end;
            }
            None => i += 1,
        }
    }
    out.push(Piece::Text(&sql[text_start..]));
    out
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    pieces(sql)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Replace each `$N` with its bound value as a quoted literal, in one pass over
/// the statement so bound text is never scanned again. Unbound placeholders
/// are left for the parser to reject.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in pieces(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, portal.parameters.as_slice())
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CampsiteFactory {
    handler: Arc<CampsiteHandler>,
    noop: Arc<NoopHandler>,
}

impl CampsiteFactory {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            handler: Arc::new(CampsiteHandler::new(service)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CampsiteFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, service: Arc<Service>) -> std::io::Result<()> {
    let factory = Arc::new(CampsiteFactory::new(service));
    pgwire::tokio::process_socket(socket, None, factory).await
}

/// SQLSTATE for a reservation error.
pub fn sqlstate(e: &ReservationError) -> &'static str {
    match e {
        ReservationError::Validation(_)
        | ReservationError::InvalidRange { .. }
        | ReservationError::DatesUnavailable { .. }
        | ReservationError::LimitExceeded(_) => "22023",
        ReservationError::NotFound(_) => "P0002",
        ReservationError::Saving(_) => "40001",
    }
}

fn reservation_err(e: ReservationError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn sqlstate_mapping() {
        assert_eq!(sqlstate(&ReservationError::Validation(vec![])), "22023");
        assert_eq!(
            sqlstate(&ReservationError::DatesUnavailable { conflicting: None }),
            "22023"
        );
        assert_eq!(sqlstate(&ReservationError::NotFound(Ulid::new())), "P0002");
        assert_eq!(sqlstate(&ReservationError::Saving("x".into())), "40001");
    }

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM reservations"), 0);
        assert_eq!(count_params("DELETE FROM reservations WHERE id = $1"), 1);
        assert_eq!(
            count_params("UPDATE reservations SET email = $2, first_name = $10 WHERE id = $1"),
            10
        );
    }

    #[test]
    fn count_params_ignores_quoted_dollars() {
        assert_eq!(count_params("SELECT * FROM reservations WHERE id = '$9'"), 0);
        assert_eq!(count_params("UPDATE reservations SET \"$3\" = $2 WHERE id = $1"), 2);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO reservations (email, first_name, last_name, arrival_date, departure_date) \
                   VALUES ($1, $2, $3, $4, $5)";
        let params: Vec<Option<&str>> = vec![
            Some("a@b.com"),
            Some("$1"),
            Some("O'Brien"),
            Some("2024-05-10"),
            None,
        ];
        let bound = bind_params(sql, params.as_slice());
        assert!(
            bound.ends_with("VALUES ('a@b.com', '$1', 'O''Brien', '2024-05-10', NULL)"),
            "{bound}"
        );
        match sql::parse_sql(&bound).unwrap() {
            Command::InsertReservation { input } => {
                assert_eq!(input.first_name.as_deref(), Some("$1"));
                assert_eq!(input.last_name.as_deref(), Some("O'Brien"));
                assert_eq!(input.departure_date, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn bind_params_handles_two_digit_indexes_and_unbound() {
        let params: Vec<Option<&str>> = (1..=10).map(|_| Some("v")).collect();
        assert_eq!(bind_params("$10 $1", params.as_slice()), "'v' 'v'");
        assert_eq!(bind_params("$11", params.as_slice()), "$11");
        assert_eq!(bind_params("cost $", params.as_slice()), "cost $");
    }

    #[test]
    fn result_schema_by_statement() {
        assert_eq!(result_schema("SELECT * FROM availability").len(), 1);
        assert_eq!(result_schema("SELECT * FROM reservations").len(), 7);
        assert_eq!(
            result_schema("INSERT INTO reservations VALUES ($1, $2, $3, $4, $5)").len(),
            7
        );
        assert!(result_schema("DELETE FROM reservations WHERE id = $1").is_empty());
    }

    #[test]
    fn result_schema_ignores_table_names_in_literals() {
        let sql = "INSERT INTO reservations (email, first_name, last_name, arrival_date, departure_date) \
                   VALUES ('availability@x.io', 'A', 'B', '2024-05-10', '2024-05-12')";
        assert_eq!(result_schema(sql).len(), 7);
        assert!(result_schema("DELETE FROM reservations WHERE id = 'reservations'").is_empty());
    }
}
