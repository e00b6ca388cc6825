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
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{AllocdAuthSource, Roster};
use crate::engine::{require_admin, Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Decision};

pub struct AllocdHandler {
    engine: Arc<Engine>,
    roster: Arc<Roster>,
    query_parser: Arc<AllocdQueryParser>,
}

impl AllocdHandler {
    pub fn new(engine: Arc<Engine>, roster: Arc<Roster>) -> Self {
        Self {
            engine,
            roster,
            query_parser: Arc::new(AllocdQueryParser),
        }
    }

    /// The login user, resolved against the admin roster.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                "no user in startup parameters".into(),
            )))
        })?;
        Ok(self.roster.resolve(user))
    }

    async fn execute(&self, actor: &Actor, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.dispatch(actor, cmd).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn dispatch(&self, actor: &Actor, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::UpsertFacility {
                id,
                name,
                slots,
                active,
            } => {
                require_admin(actor)?;
                engine.upsert_facility(id, name, slots, active).await?;
                Ok(inserted())
            }
            Command::UpsertItem { id, name, total } => {
                require_admin(actor)?;
                engine.upsert_item(id, name, total).await?;
                Ok(inserted())
            }
            Command::InsertReservation(req) => {
                engine.create_reservation(actor, req).await?;
                Ok(inserted())
            }
            Command::DecideReservation {
                id,
                decision,
                note,
                admin_notes,
            } => {
                match decision {
                    Decision::Approve => {
                        engine.approve_reservation(actor, id, note.or(admin_notes)).await?;
                    }
                    Decision::Reject => {
                        let reason = note.unwrap_or_default();
                        engine.reject_reservation(actor, id, &reason, admin_notes).await?;
                    }
                    Decision::Return => {
                        return Err(EngineError::invalid("reservations cannot be returned"));
                    }
                }
                Ok(inserted())
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(actor, id).await?;
                Ok(deleted())
            }
            Command::InsertRental(req) => {
                engine.create_rental(actor, req).await?;
                Ok(inserted())
            }
            Command::DecideRental {
                id,
                decision,
                note,
                admin_notes,
            } => {
                match decision {
                    Decision::Approve => {
                        engine.approve_rental(actor, id, note.or(admin_notes)).await?;
                    }
                    Decision::Reject => {
                        let reason = note.unwrap_or_default();
                        engine.reject_rental(actor, id, &reason, admin_notes).await?;
                    }
                    Decision::Return => {
                        engine.return_rental(actor, id).await?;
                    }
                }
                Ok(inserted())
            }
            Command::DeleteRental { id } => {
                engine.delete_rental(actor, id).await?;
                Ok(deleted())
            }
            Command::SelectReservations(filter) => {
                let rows = engine.list_reservations(&filter).await;
                Ok(query(reservations_schema(), rows.iter(), encode_reservation))
            }
            Command::SelectRentals(filter) => {
                let rows = engine.list_rentals(&filter).await;
                Ok(query(rentals_schema(), rows.iter(), encode_rental))
            }
            Command::SelectAvailability { facility_id, date } => {
                let slots = engine.availability(facility_id, date).await?;
                let (fid, day) = (facility_id.to_string(), date.to_string());
                Ok(query(availability_schema(), slots.iter(), |enc, slot| {
                    enc.encode_field(&fid)?;
                    enc.encode_field(&day)?;
                    enc.encode_field(&fmt_slot(slot.span.start))?;
                    enc.encode_field(&fmt_slot(slot.span.end))?;
                    enc.encode_field(&slot.status.as_str().to_string())
                }))
            }
            Command::SelectFreeWindows { facility_id, date } => {
                let windows = engine.free_windows(facility_id, date).await?;
                let (fid, day) = (facility_id.to_string(), date.to_string());
                Ok(query(free_windows_schema(), windows.iter(), |enc, span| {
                    enc.encode_field(&fid)?;
                    enc.encode_field(&day)?;
                    enc.encode_field(&fmt_slot(span.start))?;
                    enc.encode_field(&fmt_slot(span.end))?;
                    enc.encode_field(&span.minutes())
                }))
            }
            Command::SelectStock { item_id } => {
                let stock = engine.stock(item_id).await?;
                Ok(query(stock_schema(), std::iter::once(&stock), |enc, s| {
                    enc.encode_field(&s.item_id.to_string())?;
                    enc.encode_field(&(s.available as i64))?;
                    enc.encode_field(&(s.total as i64))
                }))
            }
            Command::SelectFacilities => {
                let rows = engine.list_facilities().await;
                Ok(query(facilities_schema(), rows.iter(), |enc, f| {
                    let slots: Vec<String> = f.time_slots.iter().map(|t| fmt_slot(*t)).collect();
                    enc.encode_field(&f.id.to_string())?;
                    enc.encode_field(&f.name)?;
                    enc.encode_field(&slots.join(","))?;
                    enc.encode_field(&f.active)
                }))
            }
            Command::SelectItems => {
                let rows = engine.list_items().await;
                Ok(query(items_schema(), rows.iter(), |enc, i| {
                    enc.encode_field(&i.id.to_string())?;
                    enc.encode_field(&i.name)?;
                    enc.encode_field(&(i.available as i64))?;
                    enc.encode_field(&(i.total as i64))
                }))
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

/// Encode every row eagerly against `schema`; a per-row encode failure is
/// reported in place of that row.
fn query<'a, T: 'a>(
    schema: Vec<FieldInfo>,
    rows: impl Iterator<Item = &'a T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = rows
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.facility_id.to_string())?;
    enc.encode_field(&r.requester_id)?;
    enc.encode_field(&r.date.to_string())?;
    enc.encode_field(&fmt_slot(r.span.start))?;
    enc.encode_field(&fmt_slot(r.span.end))?;
    enc.encode_field(&r.purpose)?;
    enc.encode_field(&(r.participants as i64))?;
    enc.encode_field(&r.contact)?;
    enc.encode_field(&r.status.as_str().to_string())?;
    enc.encode_field(&r.admin_notes)?;
    enc.encode_field(&r.rejection_reason)?;
    enc.encode_field(&r.processed_at)?;
    enc.encode_field(&r.created_at)
}

fn encode_rental(enc: &mut DataRowEncoder, r: &RentalRequest) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.item_id.to_string())?;
    enc.encode_field(&r.requester_id)?;
    enc.encode_field(&(r.quantity as i64))?;
    enc.encode_field(&r.rental_date.to_string())?;
    enc.encode_field(&r.return_date.to_string())?;
    enc.encode_field(&r.purpose)?;
    enc.encode_field(&r.status.as_str().to_string())?;
    enc.encode_field(&r.admin_notes)?;
    enc.encode_field(&r.rejection_reason)?;
    enc.encode_field(&r.processed_at)?;
    enc.encode_field(&r.returned_at)?;
    enc.encode_field(&r.created_at)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("facility_id", Type::VARCHAR),
        field("requester_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("purpose", Type::VARCHAR),
        field("participants", Type::INT8),
        field("contact", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("admin_notes", Type::VARCHAR),
        field("rejection_reason", Type::VARCHAR),
        field("processed_at", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn rentals_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("item_id", Type::VARCHAR),
        field("requester_id", Type::VARCHAR),
        field("quantity", Type::INT8),
        field("rental_date", Type::VARCHAR),
        field("return_date", Type::VARCHAR),
        field("purpose", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("admin_notes", Type::VARCHAR),
        field("rejection_reason", Type::VARCHAR),
        field("processed_at", Type::INT8),
        field("returned_at", Type::INT8),
        field("created_at", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("facility_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("status", Type::VARCHAR),
    ]
}

fn free_windows_schema() -> Vec<FieldInfo> {
    vec![
        field("facility_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
        field("minutes", Type::INT8),
    ]
}

fn stock_schema() -> Vec<FieldInfo> {
    vec![
        field("item_id", Type::VARCHAR),
        field("available", Type::INT8),
        field("total", Type::INT8),
    ]
}

fn facilities_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("slots", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn items_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("available", Type::INT8),
        field("total", Type::INT8),
    ]
}

/// Result columns for a statement, judged from the table after `FROM`.
/// Writes return no rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_ascii_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|w| w.trim_end_matches(';'));
    match table {
        Some("reservations") => reservations_schema(),
        Some("rentals") => rentals_schema(),
        Some("availability") => availability_schema(),
        Some("free_windows") => free_windows_schema(),
        Some("stock") => stock_schema(),
        Some("facilities") => facilities_schema(),
        Some("items") => items_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for AllocdHandler {
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
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.execute(&actor, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AllocdQueryParser;

#[async_trait]
impl QueryParser for AllocdQueryParser {
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
impl ExtendedQueryHandler for AllocdHandler {
    type Statement = String;
    type QueryParser = AllocdQueryParser;

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
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute(&actor, cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Replace `$1, $2, ...` with the bound text-format values as quoted literals.
/// Highest index first so `$1` does not clobber `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AllocdFactory {
    handler: Arc<AllocdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AllocdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AllocdFactory {
    pub fn new(engine: Arc<Engine>, roster: Arc<Roster>, password: String) -> Self {
        Self {
            handler: Arc::new(AllocdHandler::new(engine, roster)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                AllocdAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AllocdFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<AllocdFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict(_) => "23P01",
        EngineError::InsufficientStock { .. } => "23514",
        EngineError::AlreadyProcessed { .. } => "40001",
        EngineError::InvalidState { .. } => "55000",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
