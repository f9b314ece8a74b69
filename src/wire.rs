use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::auth::ChairslotAuthSource;
use crate::engine::{Engine, EngineError, ErrorClass, SlotQuery};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;
use crate::timegrid;

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls_acceptor: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = ChairslotFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls_acceptor, factory).await
}

pub struct ChairslotHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ChairslotQueryParser>,
}

impl ChairslotHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ChairslotQueryParser),
        }
    }

    /// The connection's database name selects the barbershop.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<(String, Arc<Engine>)> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let engine = self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })?;
        Ok((db, engine))
    }

    /// Parse, run and meter one statement.
    async fn run<C: ClientInfo>(
        &self,
        client: &C,
        sql: &str,
        format: &Format,
    ) -> PgWireResult<Response> {
        let (tenant, engine) = self.resolve_engine(client)?;
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                debug!("rejected statement on {tenant:?}: {e}");
                return Err(sql_err(e));
            }
        };

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = execute_command(&engine, &tenant, cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        debug!("{label} on {tenant:?}: {status}");
        result
    }
}

async fn execute_command(
    engine: &Engine,
    tenant: &str,
    cmd: Command,
    format: &Format,
) -> PgWireResult<Response> {
    match cmd {
        Command::InsertProfessional { id, name, rest_day } => {
            engine
                .register_professional(id, name, rest_day)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::UpsertWorkingHours {
            professional_id,
            day_of_week,
            hours,
        } => {
            engine
                .set_working_hours(professional_id, day_of_week, hours)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::InsertBlockedPeriod { block } => {
            engine.add_blocked_period(block).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::DeleteBlockedPeriod { id } => {
            engine.remove_blocked_period(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::InsertAppointment {
            id,
            professional_id,
            start,
            end,
            client_id,
            service_id,
            origin,
        } => {
            let request = BookingRequest {
                origin,
                client_id,
                service_id,
            };
            engine
                .reserve(id, professional_id, Period::new(start, end), request)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::ImportAppointment {
            id,
            professional_id,
            start,
            duration_minutes,
            status,
            client_id,
            service_id,
        } => {
            engine
                .import_appointment(
                    id,
                    professional_id,
                    start,
                    duration_minutes,
                    status,
                    client_id,
                    service_id,
                )
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
        }
        Command::UpdateAppointmentStatus { id, status, rating } => {
            engine
                .update_appointment_status(id, status, rating)
                .await
                .map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::SelectSlots {
            professional_id,
            date,
            duration_minutes,
            barbershop_id,
        } => {
            if let Some(shop) = &barbershop_id
                && shop != tenant
            {
                return Err(user_error(
                    "22023",
                    format!("barbershop_id {shop:?} does not match database {tenant:?}"),
                ));
            }
            let query = SlotQuery {
                professional_id,
                date,
                duration_minutes,
                barbershop_id,
            };
            let slots = engine.available_slots(&query).await.map_err(engine_err)?;
            let schema = Arc::new(table_schema("slots", format));
            rows_response(schema, slots, |encoder, slot| encoder.encode_field(slot))
        }
        Command::SelectAppointments {
            professional_id,
            range,
        } => {
            let appointments = engine
                .list_appointments(professional_id, range)
                .await
                .map_err(engine_err)?;
            let schema = Arc::new(table_schema("appointments", format));
            rows_response(schema, appointments, |encoder, a| {
                let duration = match a.duration {
                    AppointmentDuration::WithDuration { minutes } => Some(minutes as i64),
                    AppointmentDuration::LegacyPointInTime => None,
                };
                encoder.encode_field(&a.id.to_string())?;
                encoder.encode_field(&a.professional_id.to_string())?;
                encoder.encode_field(&a.start)?;
                encoder.encode_field(&a.end())?;
                encoder.encode_field(&duration)?;
                encoder.encode_field(&a.status.as_str().to_string())?;
                encoder.encode_field(&a.origin.as_str().to_string())?;
                encoder.encode_field(&a.client_id)?;
                encoder.encode_field(&a.service_id)?;
                encoder.encode_field(&a.rating.map(i32::from))
            })
        }
        Command::SelectBlockedPeriods { professional_id } => {
            let blocks = engine.list_blocked_periods(professional_id).await;
            let schema = Arc::new(table_schema("blocked_periods", format));
            rows_response(schema, blocks, |encoder, b| {
                let (dow, date) = match b.recurrence {
                    BlockRecurrence::Recurring { day_of_week } => (Some(day_of_week as i32), None),
                    BlockRecurrence::Single { date } => (None, Some(date.to_string())),
                };
                encoder.encode_field(&b.id.to_string())?;
                encoder.encode_field(&b.professional_id.to_string())?;
                encoder.encode_field(&dow)?;
                encoder.encode_field(&date)?;
                encoder.encode_field(&timegrid::format_minutes(b.span.start))?;
                encoder.encode_field(&timegrid::format_minutes(b.span.end))?;
                encoder.encode_field(&b.label)
            })
        }
        Command::SelectWorkingHours { professional_id } => {
            let week = engine.working_week(professional_id).await;
            let schema = Arc::new(table_schema("working_hours", format));
            let pid = professional_id.to_string();
            rows_response(schema, week, |encoder, (day, hours)| {
                encoder.encode_field(&pid)?;
                encoder.encode_field(&(*day as i32))?;
                encoder.encode_field(&hours.is_working)?;
                encoder.encode_field(&timegrid::format_minutes(hours.start))?;
                encoder.encode_field(&timegrid::format_minutes(hours.end))
            })
        }
        Command::SelectProfessionals => {
            let professionals = engine.list_professionals().await;
            let schema = Arc::new(table_schema("professionals", format));
            rows_response(schema, professionals, |encoder, p| {
                encoder.encode_field(&p.id.to_string())?;
                encoder.encode_field(&p.name)
            })
        }
    }
}

fn rows_response<T>(
    schema: Arc<Vec<FieldInfo>>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns of each readable table. Writes return no columns.
fn table_schema(table: &str, format: &Format) -> Vec<FieldInfo> {
    let columns: &[(&str, Type)] = match table {
        "slots" => &[("slot", Type::VARCHAR)],
        "appointments" => &[
            ("id", Type::VARCHAR),
            ("professional_id", Type::VARCHAR),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("duration_minutes", Type::INT8),
            ("status", Type::VARCHAR),
            ("origin", Type::VARCHAR),
            ("client_id", Type::VARCHAR),
            ("service_id", Type::VARCHAR),
            ("rating", Type::INT4),
        ],
        "blocked_periods" => &[
            ("id", Type::VARCHAR),
            ("professional_id", Type::VARCHAR),
            ("day_of_week", Type::INT4),
            ("block_date", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
            ("label", Type::VARCHAR),
        ],
        "working_hours" => &[
            ("professional_id", Type::VARCHAR),
            ("day_of_week", Type::INT4),
            ("is_working", Type::BOOL),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
        ],
        "professionals" => &[("id", Type::VARCHAR), ("name", Type::VARCHAR)],
        _ => &[],
    };
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i))
        })
        .collect()
}

fn statement_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    sql::select_table(sql)
        .map(|table| table_schema(&table, format))
        .unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for ChairslotHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let response = self.run(client, query, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ChairslotQueryParser;

#[async_trait]
impl QueryParser for ChairslotQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(
            stmt,
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ChairslotHandler {
    type Statement = String;
    type QueryParser = ChairslotQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
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
        self.run(client, &sql, &portal.result_column_format).await
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
            statement_schema(&target.statement, &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ChairslotFactory {
    handler: Arc<ChairslotHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<ChairslotAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl ChairslotFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = ChairslotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ChairslotHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ChairslotFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine error class.
fn sqlstate(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::InvalidArgument => "22023",
        ErrorClass::NotFound => "P0002",
        ErrorClass::Conflict => "23P01",
        ErrorClass::Internal => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    let class = e.class();
    if class == ErrorClass::Internal {
        error!("internal error: {e}");
    }
    user_error(sqlstate(class), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.sqlstate(), e.to_string())
}
