//! `PostgreSQL` ticket storage for Coachline.
//!
//! [`PostgresTicketStore`] implements [`TicketStore`] on top of a sqlx pool.
//! Seat uniqueness is enforced by a partial unique index over
//! `(trip_id, seat_number)` restricted to `reserved` and `paid` rows, so two
//! concurrent reservations for one seat can never both commit. Updates are
//! compare-and-set on the `version` column.
//!
//! # Example
//!
//! ```ignore
//! use coachline_postgres::PostgresTicketStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresTicketStore::connect("postgres://localhost/coachline", 10, 5).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod row;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::error::{StoreError, StoreResult};
use coachline_core::store::TicketStore;
use coachline_core::ticket::{Ticket, TicketStatus};
use coachline_core::types::{DocumentHandle, InvoiceId, RefundId, SeatNumber, TicketId, TripId};
use row::{Encoded, TICKET_COLUMNS, TicketRow};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Index guarding one active ticket per seat
const ACTIVE_SEAT_INDEX: &str = "tickets_active_seat_key";
const INVOICE_KEY: &str = "tickets_invoice_id_key";
const REFUND_KEY: &str = "tickets_refund_id_key";

/// Ticket store backed by `PostgreSQL`
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Database(format!("{context}: {e}"))
}

/// Translate a failed write, turning unique violations into domain conflicts
fn write_error(e: sqlx::Error, ticket: &Ticket) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(ACTIVE_SEAT_INDEX) => {
                    return StoreError::SeatTaken {
                        trip_id: ticket.trip_id,
                        seat: ticket.seat_number,
                    };
                }
                Some(INVOICE_KEY) => {
                    if let Some(invoice) = &ticket.invoice_id {
                        return StoreError::DuplicateInvoice(invoice.clone());
                    }
                }
                Some(REFUND_KEY) => {
                    if let Some(refund) = &ticket.refund_id {
                        return StoreError::DuplicateRefund(refund.clone());
                    }
                }
                _ => {}
            }
        }
    }
    StoreError::Database(format!("Failed to write ticket {}: {e}", ticket.id))
}

impl PostgresTicketStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if no connection can be established.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Compare-and-set write of one ticket inside `tx`
    async fn write_in(tx: &mut Transaction<'_, Postgres>, ticket: &Ticket) -> StoreResult<Ticket> {
        let encoded = Encoded::of(ticket)?;
        let sql = format!(
            "UPDATE tickets \
             SET status = $3, invoice_id = $4, refund_id = $5, reserved_until = $6, \
                 document = $7, updated_at = $8, version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING {TICKET_COLUMNS}"
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(*ticket.id.as_uuid())
            .bind(encoded.version)
            .bind(ticket.status.as_str())
            .bind(ticket.invoice_id.as_ref().map(InvoiceId::as_str))
            .bind(ticket.refund_id.as_ref().map(RefundId::as_str))
            .bind(ticket.reserved_until)
            .bind(ticket.document.as_ref().map(DocumentHandle::as_str))
            .bind(ticket.updated_at)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| write_error(e, ticket))?;

        if let Some(row) = row {
            return Ticket::try_from(row);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT version FROM tickets WHERE id = $1")
            .bind(*ticket.id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error("Failed to read ticket version"))?;

        Err(match exists {
            Some(_) => {
                metrics::counter!("store_version_conflicts_total").increment(1);
                StoreError::Conflict {
                    ticket_id: ticket.id,
                    expected: ticket.version,
                }
            }
            None => StoreError::NotFound(ticket.id),
        })
    }
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    async fn insert_reservation(&self, ticket: &Ticket, now: DateTime<Utc>) -> StoreResult<Ticket> {
        let encoded = Encoded::of(ticket)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        let lapsed = sqlx::query(
            "UPDATE tickets \
             SET status = 'expired', reserved_until = NULL, updated_at = $3, version = version + 1 \
             WHERE trip_id = $1 AND seat_number = $2 AND status = 'reserved' AND reserved_until < $3",
        )
        .bind(ticket.trip_id.get())
        .bind(encoded.seat_number)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to release lapsed hold"))?
        .rows_affected();

        if lapsed > 0 {
            tracing::debug!(
                trip_id = %ticket.trip_id,
                seat = %ticket.seat_number,
                "Released lapsed hold before reserving"
            );
        }

        let sql = format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING {TICKET_COLUMNS}"
        );
        let row: TicketRow = sqlx::query_as(&sql)
            .bind(*ticket.id.as_uuid())
            .bind(ticket.trip_id.get())
            .bind(encoded.seat_number)
            .bind(&ticket.origin)
            .bind(&ticket.destination)
            .bind(encoded.price_cents)
            .bind(ticket.status.as_str())
            .bind(ticket.invoice_id.as_ref().map(InvoiceId::as_str))
            .bind(ticket.refund_id.as_ref().map(RefundId::as_str))
            .bind(ticket.reserved_until)
            .bind(*ticket.owner.user_id.as_uuid())
            .bind(&ticket.owner.email)
            .bind(&ticket.owner.display_name)
            .bind(ticket.document.as_ref().map(DocumentHandle::as_str))
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .bind(encoded.version + 1)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| write_error(e, ticket))?;

        tx.commit().await.map_err(|e| write_error(e, ticket))?;
        Ticket::try_from(row)
    }

    async fn get(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get ticket"))?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn update(&self, ticket: &Ticket) -> StoreResult<Ticket> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let stored = Self::write_in(&mut tx, ticket).await?;
        tx.commit().await.map_err(|e| write_error(e, ticket))?;
        Ok(stored)
    }

    async fn update_batch(&self, tickets: &[Ticket]) -> StoreResult<Vec<Ticket>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        let mut stored = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            // Dropping `tx` on error rolls the whole batch back
            stored.push(Self::write_in(&mut tx, ticket).await?);
        }
        tx.commit()
            .await
            .map_err(db_error("Failed to commit batch"))?;
        Ok(stored)
    }

    async fn taken_seats(&self, trip_id: TripId, now: DateTime<Utc>) -> StoreResult<BTreeSet<SeatNumber>> {
        let seats: Vec<i32> = sqlx::query_scalar(
            "SELECT seat_number FROM tickets \
             WHERE trip_id = $1 AND status IN ('reserved', 'paid') \
               AND (reserved_until IS NULL OR reserved_until >= $2)",
        )
        .bind(trip_id.get())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load taken seats"))?;

        seats
            .into_iter()
            .map(|n| {
                u32::try_from(n)
                    .ok()
                    .and_then(|n| SeatNumber::new(n).ok())
                    .ok_or_else(|| StoreError::Serialization(format!("invalid seat number {n}")))
            })
            .collect()
    }

    async fn is_seat_taken(&self, trip_id: TripId, seat: SeatNumber, now: DateTime<Utc>) -> StoreResult<bool> {
        let seat = i32::try_from(seat.get())
            .map_err(|_| StoreError::Serialization(format!("seat {seat} out of range")))?;
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM tickets \
               WHERE trip_id = $1 AND seat_number = $2 AND status IN ('reserved', 'paid') \
                 AND (reserved_until IS NULL OR reserved_until >= $3))",
        )
        .bind(trip_id.get())
        .bind(seat)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to check seat"))
    }

    async fn for_trip(&self, trip_id: TripId) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE trip_id = $1 ORDER BY created_at DESC, id"
        );
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(trip_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load trip tickets"))?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
    }

    async fn reserved_past_deadline(&self, now: DateTime<Utc>) -> StoreResult<Vec<TicketId>> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            "SELECT id FROM tickets \
             WHERE status = 'reserved' AND reserved_until < $1 \
             ORDER BY reserved_until",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load lapsed reservations"))?;
        Ok(ids.into_iter().map(TicketId::from_uuid).collect())
    }

    async fn with_status(&self, status: TicketStatus) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE status = $1 ORDER BY created_at DESC, id"
        );
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load tickets by status"))?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
    }

    async fn invoice_owner(&self, invoice_id: &InvoiceId) -> StoreResult<Option<TicketId>> {
        let id: Option<uuid::Uuid> = sqlx::query_scalar("SELECT id FROM tickets WHERE invoice_id = $1")
            .bind(invoice_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to look up invoice"))?;
        Ok(id.map(TicketId::from_uuid))
    }

    async fn mark_reminder_sent(&self, ticket_id: TicketId, lead_hours: u32) -> StoreResult<bool> {
        let lead = i32::try_from(lead_hours)
            .map_err(|_| StoreError::Serialization(format!("lead time {lead_hours}h out of range")))?;
        let inserted = sqlx::query(
            "INSERT INTO ticket_reminders (ticket_id, lead_hours) VALUES ($1, $2) \
             ON CONFLICT (ticket_id, lead_hours) DO NOTHING",
        )
        .bind(*ticket_id.as_uuid())
        .bind(lead)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to record reminder"))?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn count_paid(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tickets \
             WHERE status = 'paid' \
               AND ($1::timestamptz IS NULL OR created_at >= $1) \
               AND ($2::timestamptz IS NULL OR created_at <= $2)",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count sales"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn count_by_status(&self, trip_id: Option<TripId>) -> StoreResult<HashMap<TicketStatus, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tickets \
             WHERE ($1::bigint IS NULL OR trip_id = $1) \
             GROUP BY status",
        )
        .bind(trip_id.map(TripId::get))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to count tickets"))?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse::<TicketStatus>()
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok((status, u64::try_from(count).unwrap_or_default()))
            })
            .collect()
    }

    async fn top_trips_by_paid(&self, limit: usize) -> StoreResult<Vec<(TripId, u64)>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT trip_id, COUNT(*) AS sold FROM tickets \
             WHERE status = 'paid' \
             GROUP BY trip_id \
             ORDER BY sold DESC, trip_id \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to rank trips"))?;

        Ok(rows
            .into_iter()
            .map(|(trip, sold)| (TripId::new(trip), u64::try_from(sold).unwrap_or_default()))
            .collect())
    }
}
