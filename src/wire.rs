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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::InnkeepAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct InnkeepHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    /// The database name in the startup packet selects the tenant.
    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn run(&self, engine: &Engine, query: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertRoom { room } => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, changes } => {
                engine.update_room(id, &changes).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertSeasonalRate { rate } => {
                engine.add_seasonal_rate(rate).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateSeasonalRate { id, changes } => {
                engine
                    .update_seasonal_rate(id, &changes)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteSeasonalRate { id } => {
                engine.remove_seasonal_rate(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking { mut booking, guests } => {
                booking.guests = guests.resolve().map_err(engine_err)?;
                engine.create_booking(booking).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BatchInsertBookings { bookings } => {
                let count = bookings.len();
                let batch = bookings
                    .into_iter()
                    .map(|(mut booking, guests)| {
                        booking.guests = guests.resolve()?;
                        Ok(booking)
                    })
                    .collect::<Result<Vec<_>, EngineError>>()
                    .map_err(engine_err)?;
                engine
                    .batch_create_bookings(batch)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(count)))
            }
            Command::ResizeBooking {
                id,
                check_in,
                check_out,
                override_stay_rules,
                total_amount,
            } => {
                engine
                    .resize_booking(id, check_in, check_out, override_stay_rules, total_amount)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .transition_booking(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectEffectivePrice { room_id, date } => {
                let price = engine
                    .get_effective_price(room_id, date)
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                Ok(rows(effective_price_schema(), format, &[price], |enc, p| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&p.date.to_string())?;
                    enc.encode_field(&p.base_price.to_string())?;
                    enc.encode_field(&p.effective_price.to_string())?;
                    enc.encode_field(&p.seasonal_rate.as_ref().map(|r| r.id.to_string()))?;
                    enc.encode_field(&p.seasonal_rate.as_ref().and_then(|r| r.name.clone()))?;
                    enc.encode_field(&p.currency)
                }))
            }
            Command::SelectPricing {
                room_id,
                check_in,
                check_out,
                guests,
            } => {
                let guests = guests.resolve().map_err(engine_err)?;
                let quote = engine
                    .get_batch_pricing(room_id, check_in, check_out, &guests)
                    .await
                    .map_err(engine_err)?;
                let nights = serde_json::to_string(&quote.nights)
                    .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
                Ok(rows(pricing_schema(), format, &[quote], |enc, q| {
                    enc.encode_field(&q.room_id.to_string())?;
                    enc.encode_field(&check_in.to_string())?;
                    enc.encode_field(&check_out.to_string())?;
                    enc.encode_field(&q.night_count)?;
                    enc.encode_field(&q.total_amount.to_string())?;
                    enc.encode_field(&q.currency)?;
                    enc.encode_field(&nights)
                }))
            }
            Command::SelectAvailability {
                room_id,
                check_in,
                check_out,
                override_stay_rules,
            } => {
                let avail = engine
                    .check_availability(room_id, check_in, check_out, override_stay_rules)
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                Ok(rows(availability_schema(), format, &[avail], |enc, a| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&check_in.to_string())?;
                    enc.encode_field(&check_out.to_string())?;
                    enc.encode_field(&a.available)?;
                    enc.encode_field(&(a.available_units as i64))?;
                    enc.encode_field(&(a.total_units as i64))?;
                    enc.encode_field(&a.nights)?;
                    enc.encode_field(&(a.min_stay_nights as i64))?;
                    enc.encode_field(&a.max_stay_nights.map(i64::from))?;
                    enc.encode_field(&a.meets_min_stay)?;
                    enc.encode_field(&a.meets_max_stay)
                }))
            }
            Command::SelectInventory {
                room_id,
                start,
                end,
            } => {
                let days = engine
                    .get_inventory(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let rid = room_id.to_string();
                Ok(rows(inventory_schema(), format, &days, |enc, day| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&day.date.to_string())?;
                    enc.encode_field(&(day.committed_units as i64))?;
                    enc.encode_field(&(day.available_units as i64))?;
                    enc.encode_field(&(day.total_units as i64))
                }))
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                Ok(rows(rooms_schema(), format, &rooms, encode_room))
            }
            Command::SelectSeasonalRates { room_id } => {
                let rates = engine.get_seasonal_rates(room_id).await;
                Ok(rows(seasonal_rates_schema(), format, &rates, encode_rate))
            }
            Command::SelectBookings { room_id } => {
                let bookings = engine.get_bookings(room_id).await;
                Ok(rows(bookings_schema(), format, &bookings, encode_booking))
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                Ok(rows(bookings_schema(), format, &[booking], encode_booking))
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    format: &Format,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(formatted(schema, format));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn decimal_text(v: &Option<rust_decimal::Decimal>) -> Option<String> {
    v.as_ref().map(|d| d.to_string())
}

fn encode_room(enc: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    enc.encode_field(&room.id.to_string())?;
    enc.encode_field(&room.name)?;
    enc.encode_field(&room.currency)?;
    enc.encode_field(&room.pricing_mode.as_str().to_string())?;
    enc.encode_field(&room.base_price_per_night.to_string())?;
    enc.encode_field(&decimal_text(&room.additional_person_rate))?;
    enc.encode_field(&decimal_text(&room.child_price_per_night))?;
    enc.encode_field(&room.child_free_until_age.map(i64::from))?;
    enc.encode_field(&room.child_age_limit.map(i64::from))?;
    enc.encode_field(&(room.min_stay_nights as i64))?;
    enc.encode_field(&room.max_stay_nights.map(i64::from))?;
    enc.encode_field(&room.inventory_mode.as_str().to_string())?;
    enc.encode_field(&(room.total_units as i64))?;
    enc.encode_field(&(room.max_guests as i64))
}

fn encode_rate(enc: &mut DataRowEncoder, rate: &SeasonalRate) -> PgWireResult<()> {
    enc.encode_field(&rate.id.to_string())?;
    enc.encode_field(&rate.room_id.to_string())?;
    enc.encode_field(&rate.name)?;
    enc.encode_field(&rate.start_date.to_string())?;
    enc.encode_field(&rate.end_date.to_string())?;
    enc.encode_field(&rate.price_per_night.to_string())?;
    enc.encode_field(&(rate.priority as i64))?;
    enc.encode_field(&rate.pricing_mode.map(|m| m.as_str().to_string()))?;
    enc.encode_field(&decimal_text(&rate.additional_person_rate))?;
    enc.encode_field(&decimal_text(&rate.child_price_per_night))
}

fn encode_booking(enc: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    let ages = b
        .guests
        .child_ages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.room_id.to_string())?;
    enc.encode_field(&b.stay.check_in.to_string())?;
    enc.encode_field(&b.stay.check_out.to_string())?;
    enc.encode_field(&b.stay.nights())?;
    enc.encode_field(&b.status.as_str().to_string())?;
    enc.encode_field(&b.guest_name)?;
    enc.encode_field(&b.guest_email)?;
    enc.encode_field(&(b.guests.adults as i64))?;
    enc.encode_field(&(b.guests.children as i64))?;
    enc.encode_field(&ages)?;
    enc.encode_field(&b.total_amount.to_string())?;
    enc.encode_field(&b.currency)?;
    enc.encode_field(&b.stay_rule_override)?;
    enc.encode_field(&b.created_at)
}

// ── Schemas ──────────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Re-tag columns with the result format the client asked for. Extended
/// protocol clients usually request binary.
fn formatted(fields: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            FieldInfo::new(
                f.name().to_owned(),
                f.table_id(),
                f.column_id(),
                f.datatype().clone(),
                format.format_for(i),
            )
        })
        .collect()
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("currency", Type::VARCHAR),
        field("pricing_mode", Type::VARCHAR),
        field("base_price", Type::VARCHAR),
        field("additional_person_rate", Type::VARCHAR),
        field("child_price", Type::VARCHAR),
        field("child_free_until_age", Type::INT8),
        field("child_age_limit", Type::INT8),
        field("min_stay", Type::INT8),
        field("max_stay", Type::INT8),
        field("inventory_mode", Type::VARCHAR),
        field("total_units", Type::INT8),
        field("max_guests", Type::INT8),
    ]
}

fn seasonal_rates_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("start_date", Type::VARCHAR),
        field("end_date", Type::VARCHAR),
        field("price", Type::VARCHAR),
        field("priority", Type::INT8),
        field("pricing_mode", Type::VARCHAR),
        field("additional_person_rate", Type::VARCHAR),
        field("child_price", Type::VARCHAR),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("status", Type::VARCHAR),
        field("guest_name", Type::VARCHAR),
        field("guest_email", Type::VARCHAR),
        field("adults", Type::INT8),
        field("children", Type::INT8),
        field("child_ages", Type::VARCHAR),
        field("total_amount", Type::VARCHAR),
        field("currency", Type::VARCHAR),
        field("override_stay_rules", Type::BOOL),
        field("created_at", Type::INT8),
    ]
}

fn effective_price_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("base_price", Type::VARCHAR),
        field("effective_price", Type::VARCHAR),
        field("seasonal_rate_id", Type::VARCHAR),
        field("seasonal_rate_name", Type::VARCHAR),
        field("currency", Type::VARCHAR),
    ]
}

fn pricing_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("night_count", Type::INT8),
        field("total_amount", Type::VARCHAR),
        field("currency", Type::VARCHAR),
        field("nights", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("available", Type::BOOL),
        field("available_units", Type::INT8),
        field("total_units", Type::INT8),
        field("nights", Type::INT8),
        field("min_stay", Type::INT8),
        field("max_stay", Type::INT8),
        field("meets_min_stay", Type::BOOL),
        field("meets_max_stay", Type::BOOL),
    ]
}

fn inventory_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("committed_units", Type::INT8),
        field("available_units", Type::INT8),
        field("total_units", Type::INT8),
    ]
}

/// Table named after the first FROM of a SELECT. Used to describe prepared
/// statements whose `$n` placeholders the parser cannot evaluate yet.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next()? != "select" {
        return None;
    }
    words.find(|w| *w == "from")?;
    let table = words.next()?.trim_end_matches(';').trim_matches('"');
    Some(table.to_string())
}

fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("rooms") => rooms_schema(),
        Some("seasonal_rates") => seasonal_rates_schema(),
        Some("bookings") => bookings_schema(),
        Some("effective_price") => effective_price_schema(),
        Some("pricing") => pricing_schema(),
        Some("availability") => availability_schema(),
        Some("inventory") => inventory_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
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
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
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
        let schema = result_schema(stmt);
        Ok(match column_format {
            Some(format) => formatted(schema, format),
            None => schema,
        })
    }
}

#[async_trait]
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql, &portal.result_column_format).await
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
        Ok(DescribePortalResponse::new(formatted(
            result_schema(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

/// A slice of statement text: literal SQL or one `$N` placeholder.
#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Param { index: usize, raw: &'a str },
}

/// Split SQL into text and `$N` placeholders. Placeholders inside quoted
/// literals or identifiers stay text.
fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote closes and reopens, which leaves us inside.
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
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(index) = sql[start..end].parse::<usize>() {
                    if text_start < i {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                    }
                    pieces.push(Piece::Param { index, raw: &sql[i..end] });
                    text_start = end;
                }
                i = end;
            }
            None => i += 1,
        }
    }
    if text_start < sql.len() {
        pieces.push(Piece::Text(&sql[text_start..]));
    }
    pieces
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Param { index, .. } => Some(index),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Every value is quoted; the SQL layer accepts quoted numbers, booleans and dates.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

/// Single pass, so text coming from a bound value is never rescanned.
/// Placeholders with no bound value are left as written.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param { index, raw } => match index.checked_sub(1).and_then(|i| params.get(i)) {
                Some(Some(value)) => {
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => out.push_str(raw),
            },
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls_acceptor: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = InnkeepFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls_acceptor, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidDateRange(_) | EngineError::GuestCountInvalid(_) => "22023",
        EngineError::InvalidRoom(_) | EngineError::InvalidBooking(_) => "23514",
        EngineError::StayRuleViolation { .. } => "23514",
        EngineError::AvailabilityConflict { .. } => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::HasBookings(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        SqlError::Unsupported(_) => "0A000",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::MissingColumn(..)
        | SqlError::WrongArity(..)
        | SqlError::MissingFilter(_) => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
