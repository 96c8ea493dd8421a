use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::{Order, OrderStatus};
use crate::tx::TxContext;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_no: String,
    device_id: Uuid,
    port_no: i16,
    business_no: Option<i32>,
    status: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    energy_0p01kwh: i64,
    end_reason: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepoError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_str(&row.status).map_err(|_| RepoError::NotFound)?;
        Ok(Order {
            id: row.id,
            order_no: row.order_no,
            device_id: row.device_id,
            port_no: row.port_no,
            business_no: row.business_no,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            energy_0p01kwh: row.energy_0p01kwh,
            end_reason: row.end_reason,
        })
    }
}

/// Conflict target `order_no`. Callers create the row (with a freshly
/// assigned `order_no`) on the first progress report for a session, then
/// call this again on every subsequent mid-session status update.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_order_progress(
    ctx: &mut TxContext,
    order_no: &str,
    device_id: Uuid,
    port_no: i16,
    business_no: Option<i32>,
    duration_sec: i64,
    energy_0p01kwh: i64,
    status: OrderStatus,
) -> Result<(), RepoError> {
    let _ = duration_sec; // tracked on the port row, not persisted per-order today

    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            r#"
            INSERT INTO orders (id, order_no, device_id, port_no, business_no, status, start_time, energy_0p01kwh)
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, now(), $6)
            ON CONFLICT (order_no) DO UPDATE SET
                business_no = COALESCE(EXCLUDED.business_no, orders.business_no),
                status = EXCLUDED.status,
                energy_0p01kwh = EXCLUDED.energy_0p01kwh
            "#,
        )
        .bind(order_no)
        .bind(device_id)
        .bind(port_no)
        .bind(business_no)
        .bind(status.as_str())
        .bind(energy_0p01kwh);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

/// Tries `(device_id, port_no, business_no)` first since that's what the
/// device itself references mid-session; falls back to `order_no` for
/// settlements that arrive without a `business_no` match (e.g. a session
/// that never got a progress report). Idempotent: calling this twice with
/// the same arguments is a no-op the second time, because the row is
/// already in the target terminal state.
pub async fn settle_order(
    ctx: &mut TxContext,
    device_id: Uuid,
    port_no: i16,
    business_no: Option<i32>,
    order_no_fallback: &str,
    duration_sec: i64,
    energy_0p01kwh: i64,
    end_reason: &str,
) -> Result<(), RepoError> {
    if let Some(business_no) = business_no {
        let affected = crate::tx::retry_once_on_deadlock(|| async {
            let query = sqlx::query(
                r#"
                UPDATE orders SET status = 'completed', end_time = now(), energy_0p01kwh = $4, end_reason = $5
                WHERE device_id = $1 AND port_no = $2 AND business_no = $3 AND status != 'completed'
                "#,
            )
            .bind(device_id)
            .bind(port_no)
            .bind(business_no)
            .bind(energy_0p01kwh)
            .bind(end_reason);

            Ok(match &mut *ctx {
                TxContext::Pool(pool) => query.execute(&*pool).await?.rows_affected(),
                TxContext::Tx(tx) => query.execute(&mut **tx).await?.rows_affected(),
            })
        })
        .await?;
        if affected > 0 {
            let _ = duration_sec;
            return Ok(());
        }
    }

    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            r#"
            INSERT INTO orders (id, order_no, device_id, port_no, status, end_time, energy_0p01kwh, end_reason)
            VALUES (gen_random_uuid(), $1, $2, $3, 'completed', now(), $4, $5)
            ON CONFLICT (order_no) DO UPDATE SET
                status = 'completed', end_time = now(), energy_0p01kwh = EXCLUDED.energy_0p01kwh, end_reason = EXCLUDED.end_reason
            WHERE orders.status != 'completed'
            "#,
        )
        .bind(order_no_fallback)
        .bind(device_id)
        .bind(port_no)
        .bind(energy_0p01kwh)
        .bind(end_reason);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

/// At most one row per `(device_id, port_no)`, per the non-terminal-order
/// invariant; callers that need to enforce it read this before inserting.
pub async fn find_non_terminal_order(ctx: &mut TxContext, device_id: Uuid, port_no: i16) -> Result<Option<Order>, RepoError> {
    let query = sqlx::query_as::<_, OrderRow>(
        "SELECT * FROM orders WHERE device_id = $1 AND port_no = $2 AND status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .bind(device_id)
    .bind(port_no);

    let row = match ctx {
        TxContext::Pool(pool) => query.fetch_optional(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_optional(&mut **tx).await?,
    };
    row.map(Order::try_from).transpose()
}

/// `business_no` is only overwritten when `Some` — a plain status
/// transition (e.g. settlement) can pass `None` to leave whatever business
/// number was recorded earlier untouched.
pub async fn set_order_status(
    ctx: &mut TxContext,
    order_no: &str,
    status: OrderStatus,
    business_no: Option<i32>,
) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            "UPDATE orders SET status = $2, business_no = COALESCE($3, business_no) WHERE order_no = $1",
        )
        .bind(order_no)
        .bind(status.as_str())
        .bind(business_no);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}
