use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{guests_from_counts, EngineError};
use crate::model::*;

/// Guest counts exactly as written in the query. Range checks happen in the
/// engine so negative counts surface as guest errors, not parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestCounts {
    pub adults: i64,
    pub children: i64,
    pub child_ages: Vec<i64>,
}

impl Default for GuestCounts {
    fn default() -> Self {
        Self { adults: 1, children: 0, child_ages: Vec::new() }
    }
}

impl GuestCounts {
    pub fn resolve(&self) -> Result<GuestComposition, EngineError> {
        guests_from_counts(self.adults, self.children, &self.child_ages)
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        room: Room,
    },
    UpdateRoom {
        id: Ulid,
        changes: Vec<RoomChange>,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertSeasonalRate {
        rate: SeasonalRate,
    },
    UpdateSeasonalRate {
        id: Ulid,
        changes: Vec<RateChange>,
    },
    DeleteSeasonalRate {
        id: Ulid,
    },
    InsertBooking {
        booking: NewBooking,
        guests: GuestCounts,
    },
    BatchInsertBookings {
        bookings: Vec<(NewBooking, GuestCounts)>,
    },
    ResizeBooking {
        id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
        override_stay_rules: bool,
        total_amount: Option<Decimal>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    /// Bookings are never removed; deleting one cancels it.
    DeleteBooking {
        id: Ulid,
    },
    SelectEffectivePrice {
        room_id: Ulid,
        date: NaiveDate,
    },
    SelectPricing {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: GuestCounts,
    },
    SelectAvailability {
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        override_stay_rules: bool,
    },
    SelectInventory {
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectRooms,
    SelectSeasonalRates {
        room_id: Ulid,
    },
    SelectBookings {
        room_id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
}

/// Column order for `INSERT INTO rooms VALUES (...)` without a column list.
pub const ROOM_COLUMNS: &[&str] = &[
    "id",
    "name",
    "currency",
    "pricing_mode",
    "base_price",
    "additional_person_rate",
    "child_price",
    "child_free_until_age",
    "child_age_limit",
    "min_stay",
    "max_stay",
    "inventory_mode",
    "total_units",
    "max_guests",
];

pub const SEASONAL_RATE_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "name",
    "start_date",
    "end_date",
    "price",
    "priority",
    "pricing_mode",
    "additional_person_rate",
    "child_price",
];

pub const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "check_in",
    "check_out",
    "guest_name",
    "guest_email",
    "adults",
    "children",
    "child_ages",
    "total_amount",
    "currency",
    "status",
    "override_stay_rules",
];

const DEFAULT_CURRENCY: &str = "USD";

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
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

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: &'static str,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        known: &[&str],
        columns: &[String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        let names: Vec<String> = if columns.is_empty() {
            known.iter().map(|c| c.to_string()).collect()
        } else {
            columns.to_vec()
        };
        if values.len() > names.len() || (!columns.is_empty() && values.len() != names.len()) {
            return Err(SqlError::WrongArity(table, names.len(), values.len()));
        }
        let mut cells = Vec::with_capacity(values.len());
        for (name, value) in names.into_iter().zip(values) {
            if !known.contains(&name.as_str()) {
                return Err(SqlError::UnknownColumn(table, name));
            }
            cells.push((name, value));
        }
        Ok(Self { table, cells })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.cells.iter().find(|(name, _)| name == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }

    /// Absent and NULL both read as `None`.
    fn opt<T>(&self, col: &str, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
        match self.get(col) {
            Some(expr) => nullable(expr, parse),
            None => Ok(None),
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            let [values] = rows else {
                return Err(SqlError::Unsupported("multi-row INSERT into rooms".into()));
            };
            let row = Row::new("rooms", ROOM_COLUMNS, &columns, values)?;
            Ok(Command::InsertRoom { room: room_from_row(&row)? })
        }
        "seasonal_rates" => {
            let [values] = rows else {
                return Err(SqlError::Unsupported("multi-row INSERT into seasonal_rates".into()));
            };
            let row = Row::new("seasonal_rates", SEASONAL_RATE_COLUMNS, &columns, values)?;
            Ok(Command::InsertSeasonalRate { rate: rate_from_row(&row)? })
        }
        "bookings" => {
            if let [values] = rows {
                let row = Row::new("bookings", BOOKING_COLUMNS, &columns, values)?;
                let (booking, guests) = booking_from_row(&row)?;
                return Ok(Command::InsertBooking { booking, guests });
            }
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new("bookings", BOOKING_COLUMNS, &columns, values)?;
                bookings.push(booking_from_row(&row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?);
            }
            Ok(Command::BatchInsertBookings { bookings })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn room_from_row(row: &Row) -> Result<Room, SqlError> {
    let id = parse_ulid_expr(row.require("id")?)?;
    let base = parse_decimal(row.require("base_price")?)?;
    let currency = row.opt("currency", parse_string)?.unwrap_or_else(|| DEFAULT_CURRENCY.into());
    let mut room = Room::new(id, currency, base);
    room.name = row.opt("name", parse_string)?;
    if let Some(mode) = row.opt("pricing_mode", parse_enum::<PricingMode>)? {
        room.pricing_mode = mode;
    }
    room.additional_person_rate = row.opt("additional_person_rate", parse_decimal)?;
    room.child_price_per_night = row.opt("child_price", parse_decimal)?;
    room.child_free_until_age = row.opt("child_free_until_age", parse_u32)?;
    room.child_age_limit = row.opt("child_age_limit", parse_u32)?;
    if let Some(min) = row.opt("min_stay", parse_u32)? {
        room.min_stay_nights = min;
    }
    room.max_stay_nights = row.opt("max_stay", parse_u32)?;
    if let Some(mode) = row.opt("inventory_mode", parse_enum::<InventoryMode>)? {
        room.inventory_mode = mode;
    }
    if let Some(units) = row.opt("total_units", parse_u32)? {
        room.total_units = units;
    }
    if let Some(max) = row.opt("max_guests", parse_u32)? {
        room.max_guests = max;
    }
    Ok(room)
}

fn rate_from_row(row: &Row) -> Result<SeasonalRate, SqlError> {
    let mut rate = SeasonalRate::new(
        parse_ulid_expr(row.require("id")?)?,
        parse_ulid_expr(row.require("room_id")?)?,
        parse_date(row.require("start_date")?)?,
        parse_date(row.require("end_date")?)?,
        parse_decimal(row.require("price")?)?,
    );
    rate.name = row.opt("name", parse_string)?;
    rate.priority = row.opt("priority", parse_i32)?.unwrap_or(0);
    rate.pricing_mode = row.opt("pricing_mode", parse_enum::<PricingMode>)?;
    rate.additional_person_rate = row.opt("additional_person_rate", parse_decimal)?;
    rate.child_price_per_night = row.opt("child_price", parse_decimal)?;
    Ok(rate)
}

fn booking_from_row(row: &Row) -> Result<(NewBooking, GuestCounts), SqlError> {
    let mut booking = NewBooking::new(
        parse_ulid_expr(row.require("id")?)?,
        parse_ulid_expr(row.require("room_id")?)?,
        parse_date(row.require("check_in")?)?,
        parse_date(row.require("check_out")?)?,
    );
    booking.guest_name = row.opt("guest_name", parse_string)?;
    booking.guest_email = row.opt("guest_email", parse_string)?;
    booking.total_amount = row.opt("total_amount", parse_decimal)?;
    booking.currency = row.opt("currency", parse_string)?;
    if let Some(status) = row.opt("status", parse_enum::<BookingStatus>)? {
        booking.status = status;
    }
    booking.override_stay_rules = row.opt("override_stay_rules", parse_bool)?.unwrap_or(false);

    let defaults = GuestCounts::default();
    let guests = GuestCounts {
        adults: row.opt("adults", parse_i64_expr)?.unwrap_or(defaults.adults),
        children: row.opt("children", parse_i64_expr)?.unwrap_or(defaults.children),
        child_ages: row.opt("child_ages", parse_age_list)?.unwrap_or_default(),
    };
    Ok((booking, guests))
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        sets.push((col, &a.value));
    }
    if sets.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table.as_str() {
        "rooms" => {
            let mut changes = Vec::with_capacity(sets.len());
            for (col, value) in sets {
                changes.push(room_change(&col, value)?);
            }
            Ok(Command::UpdateRoom { id, changes })
        }
        "seasonal_rates" => {
            let mut changes = Vec::with_capacity(sets.len());
            for (col, value) in sets {
                changes.push(rate_change(&col, value)?);
            }
            Ok(Command::UpdateSeasonalRate { id, changes })
        }
        "bookings" => parse_booking_update(id, sets),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn room_change(col: &str, value: &Expr) -> Result<RoomChange, SqlError> {
    Ok(match col {
        "name" => RoomChange::Name(nullable(value, parse_string)?),
        "currency" => RoomChange::Currency(parse_string(value)?),
        "pricing_mode" => RoomChange::PricingMode(parse_enum(value)?),
        "base_price" => RoomChange::BasePrice(parse_decimal(value)?),
        "additional_person_rate" => RoomChange::AdditionalPersonRate(nullable(value, parse_decimal)?),
        "child_price" => RoomChange::ChildPrice(nullable(value, parse_decimal)?),
        "child_free_until_age" => RoomChange::ChildFreeUntilAge(nullable(value, parse_u32)?),
        "child_age_limit" => RoomChange::ChildAgeLimit(nullable(value, parse_u32)?),
        "min_stay" => RoomChange::MinStayNights(parse_u32(value)?),
        "max_stay" => RoomChange::MaxStayNights(nullable(value, parse_u32)?),
        "inventory_mode" => RoomChange::InventoryMode(parse_enum(value)?),
        "total_units" => RoomChange::TotalUnits(parse_u32(value)?),
        "max_guests" => RoomChange::MaxGuests(parse_u32(value)?),
        other => return Err(SqlError::UnknownColumn("rooms", other.to_string())),
    })
}

fn rate_change(col: &str, value: &Expr) -> Result<RateChange, SqlError> {
    Ok(match col {
        "name" => RateChange::Name(nullable(value, parse_string)?),
        "start_date" => RateChange::StartDate(parse_date(value)?),
        "end_date" => RateChange::EndDate(parse_date(value)?),
        "price" => RateChange::PricePerNight(parse_decimal(value)?),
        "priority" => RateChange::Priority(parse_i32(value)?),
        "pricing_mode" => RateChange::PricingMode(nullable(value, parse_enum)?),
        "additional_person_rate" => RateChange::AdditionalPersonRate(nullable(value, parse_decimal)?),
        "child_price" => RateChange::ChildPrice(nullable(value, parse_decimal)?),
        other => return Err(SqlError::UnknownColumn("seasonal_rates", other.to_string())),
    })
}

/// `SET status = ..` is a transition; any stay columns make it a resize.
fn parse_booking_update(id: Ulid, sets: Vec<(String, &Expr)>) -> Result<Command, SqlError> {
    if let Some((_, value)) = sets.iter().find(|(col, _)| col == "status") {
        if sets.len() > 1 {
            return Err(SqlError::Unsupported(
                "status cannot be updated together with other booking columns".into(),
            ));
        }
        return Ok(Command::UpdateBookingStatus { id, status: parse_enum(value)? });
    }

    let (mut check_in, mut check_out, mut override_stay_rules, mut total_amount) = (None, None, false, None);
    for (col, value) in sets {
        match col.as_str() {
            "check_in" => check_in = Some(parse_date(value)?),
            "check_out" => check_out = Some(parse_date(value)?),
            "override_stay_rules" => override_stay_rules = parse_bool(value)?,
            "total_amount" => total_amount = nullable(value, parse_decimal)?,
            other => return Err(SqlError::UnknownColumn("bookings", other.to_string())),
        }
    }
    if check_in.is_none() && check_out.is_none() {
        return Err(SqlError::MissingColumn("bookings", "check_in or check_out"));
    }
    Ok(Command::ResizeBooking { id, check_in, check_out, override_stay_rules, total_amount })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "seasonal_rates" => Ok(Command::DeleteSeasonalRate { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Flattened `col <op> value` conjuncts of a WHERE clause.
struct Filters<'a> {
    terms: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: &'a Option<Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn find(&self, col: &str, ops: &[BinaryOperator]) -> Option<(&BinaryOperator, &'a Expr)> {
        self.terms
            .iter()
            .find(|(c, op, _)| c == col && ops.contains(op))
            .map(|(_, op, e)| (op, *e))
    }

    fn eq(&self, col: &str) -> Option<&'a Expr> {
        self.find(col, &[BinaryOperator::Eq]).map(|(_, e)| e)
    }

    fn require_eq(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(col).ok_or(SqlError::MissingFilter(col))
    }
}

fn collect_terms<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            collect_terms(left, out)?;
            collect_terms(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, op.clone(), right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_terms(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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
    let filters = Filters::from_selection(&select.selection)?;

    match table.as_str() {
        "effective_price" => Ok(Command::SelectEffectivePrice {
            room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
            date: parse_date(filters.require_eq("date")?)?,
        }),
        "pricing" => {
            let defaults = GuestCounts::default();
            let guests = GuestCounts {
                adults: filters.eq("adults").map(parse_i64_expr).transpose()?.unwrap_or(defaults.adults),
                children: filters.eq("children").map(parse_i64_expr).transpose()?.unwrap_or(defaults.children),
                child_ages: filters.eq("child_ages").map(parse_age_list).transpose()?.unwrap_or_default(),
            };
            Ok(Command::SelectPricing {
                room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
                check_in: parse_date(filters.require_eq("check_in")?)?,
                check_out: parse_date(filters.require_eq("check_out")?)?,
                guests,
            })
        }
        "availability" => Ok(Command::SelectAvailability {
            room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
            check_in: parse_date(filters.require_eq("check_in")?)?,
            check_out: parse_date(filters.require_eq("check_out")?)?,
            override_stay_rules: filters.eq("override_stay_rules").map(parse_bool).transpose()?.unwrap_or(false),
        }),
        "inventory" => {
            let (_, start) = filters
                .find("date", &[BinaryOperator::GtEq])
                .ok_or(SqlError::MissingFilter("date >="))?;
            let (op, end) = filters
                .find("date", &[BinaryOperator::Lt, BinaryOperator::LtEq])
                .ok_or(SqlError::MissingFilter("date <"))?;
            let mut end = parse_date(end)?;
            if *op == BinaryOperator::LtEq {
                end = end
                    .succ_opt()
                    .ok_or_else(|| SqlError::Parse(format!("date {end} out of range")))?;
            }
            Ok(Command::SelectInventory {
                room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
                start: parse_date(start)?,
                end,
            })
        }
        "rooms" => Ok(Command::SelectRooms),
        "seasonal_rates" => Ok(Command::SelectSeasonalRates {
            room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
        }),
        "bookings" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::SelectBooking { id: parse_ulid_expr(id)? });
            }
            Ok(Command::SelectBookings {
                room_id: parse_ulid_expr(filters.require_eq("room_id")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => Err(SqlError::Parse("empty VALUES".into())),
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp { left, op: BinaryOperator::Eq, right })
            if expr_column_name(left).as_deref() == Some("id") =>
        {
            parse_ulid_expr(right)
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

/// Text of a literal: quoted strings and bare numbers both qualify.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn nullable<T>(expr: &Expr, parse: fn(&Expr) -> Result<T, SqlError>) -> Result<Option<T>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse(expr).map(Some),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64_expr(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim().parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64_expr(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_decimal(expr)?);
    }
    let s = literal_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad amount {s:?}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    // DATE '2024-06-01' arrives as a typed string
    if let Expr::TypedString(ast::TypedString { value, .. }) = expr
        && let Value::SingleQuotedString(s) = &value.value
    {
        return date_from_str(s);
    }
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => date_from_str(s),
        _ => Err(SqlError::Parse(format!("expected 'YYYY-MM-DD' date, got {expr}"))),
    }
}

fn date_from_str(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_enum<T: FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
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
        _ => Err(SqlError::Parse(format!("expected bool, got {expr}"))),
    }
}

/// Child ages as a comma list in a string: `'4,9'`. A bare number is one age.
fn parse_age_list(expr: &Expr) -> Result<Vec<i64>, SqlError> {
    if let Expr::UnaryOp { .. } = expr {
        return Ok(vec![parse_i64_expr(expr)?]);
    }
    literal_text(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| SqlError::Parse(format!("bad child age {s:?}"))))
        .collect()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
