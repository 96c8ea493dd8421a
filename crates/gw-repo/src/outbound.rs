use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::{OutboundMessage, OutboundStatus};
use crate::tx::TxContext;

#[derive(sqlx::FromRow)]
struct OutboundRow {
    id: i64,
    device_id: Uuid,
    command_code: i32,
    sequence: i64,
    payload: Vec<u8>,
    priority: i32,
    status: String,
    tries: i32,
    max_tries: i32,
    not_before: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OutboundRow> for OutboundMessage {
    type Error = RepoError;

    fn try_from(row: OutboundRow) -> Result<Self, Self::Error> {
        let status = OutboundStatus::from_str(&row.status).map_err(|_| RepoError::NotFound)?;
        Ok(OutboundMessage {
            id: row.id,
            device_id: row.device_id,
            command_code: row.command_code,
            sequence: row.sequence,
            payload: row.payload,
            priority: row.priority,
            status,
            tries: row.tries,
            max_tries: row.max_tries,
            not_before: row.not_before,
            last_error: row.last_error,
            created_at: row.created_at,
        })
    }
}

pub async fn enqueue_outbound(
    ctx: &mut TxContext,
    device_id: Uuid,
    command_code: i32,
    sequence: i64,
    payload: &[u8],
    priority: i32,
    max_tries: i32,
) -> Result<i64, RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO outbound_messages (device_id, command_code, sequence, payload, priority, status, tries, max_tries, not_before, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6, now(), now())
            RETURNING id
            "#,
        )
        .bind(device_id)
        .bind(command_code)
        .bind(sequence)
        .bind(payload)
        .bind(priority)
        .bind(max_tries);

        Ok(match &mut *ctx {
            TxContext::Pool(pool) => query.fetch_one(&*pool).await?,
            TxContext::Tx(tx) => query.fetch_one(&mut **tx).await?,
        })
    })
    .await
}

/// `status IN (pending, sent) AND not_before <= now()`, locked
/// `FOR UPDATE SKIP LOCKED` so concurrent workers (same instance or across
/// instances) never pick up the same row, ordered `priority DESC, id ASC`
/// so higher-priority and older messages go out first.
pub async fn dequeue_due(ctx: &mut TxContext, limit: i64, now: DateTime<Utc>) -> Result<Vec<OutboundMessage>, RepoError> {
    let query = sqlx::query_as::<_, OutboundRow>(
        r#"
        SELECT * FROM outbound_messages
        WHERE status IN ('pending', 'sent') AND not_before <= $1
        ORDER BY priority DESC, id ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .bind(limit);

    let rows = match ctx {
        TxContext::Pool(pool) => query.fetch_all(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_all(&mut **tx).await?,
    };
    rows.into_iter().map(OutboundMessage::try_from).collect()
}

/// Cold-start recovery: messages stuck in `sent` whose owning instance died
/// between send and ACK. Emitted back into the due-queue without touching
/// `tries`, since the device may never have actually received them.
pub async fn list_stuck_since(ctx: &mut TxContext, cutoff: DateTime<Utc>) -> Result<Vec<OutboundMessage>, RepoError> {
    let query = sqlx::query_as::<_, OutboundRow>(
        "SELECT * FROM outbound_messages WHERE status = 'sent' AND not_before <= $1 ORDER BY priority DESC, id ASC",
    )
    .bind(cutoff);

    let rows = match ctx {
        TxContext::Pool(pool) => query.fetch_all(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_all(&mut **tx).await?,
    };
    rows.into_iter().map(OutboundMessage::try_from).collect()
}

/// Used right after [`enqueue_outbound`] to stamp the wire sequence once the
/// row's id (which doubles as the sequence, guaranteeing per-device
/// uniqueness) is known.
pub async fn set_sequence(ctx: &mut TxContext, id: i64, sequence: i64) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query("UPDATE outbound_messages SET sequence = $2 WHERE id = $1")
            .bind(id)
            .bind(sequence);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

/// Count of rows in `pending`/`sent` state, used to decide whether a
/// low-priority enqueue should be rejected with `ErrOverloaded`.
pub async fn count_active(ctx: &mut TxContext) -> Result<i64, RepoError> {
    let query = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM outbound_messages WHERE status IN ('pending', 'sent')");

    let count = match ctx {
        TxContext::Pool(pool) => query.fetch_one(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_one(&mut **tx).await?,
    };
    Ok(count)
}

pub async fn mark_sent(ctx: &mut TxContext, id: i64, next_attempt: DateTime<Utc>) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            "UPDATE outbound_messages SET status = 'sent', tries = tries + 1, not_before = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(next_attempt);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

pub async fn mark_offline_retry(ctx: &mut TxContext, id: i64, not_before: DateTime<Utc>) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query("UPDATE outbound_messages SET not_before = $2 WHERE id = $1")
            .bind(id)
            .bind(not_before);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

/// `status = acked ⇒ ∃ uplink ACK with matching sequence` — callers only
/// invoke this from `ProtoRouter`'s ACK-correlation path, matched on
/// `(device_id, sequence)`.
pub async fn ack(ctx: &mut TxContext, device_id: Uuid, sequence: i64) -> Result<u64, RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            "UPDATE outbound_messages SET status = 'acked' WHERE device_id = $1 AND sequence = $2 AND status != 'acked'",
        )
        .bind(device_id)
        .bind(sequence);

        Ok(match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?.rows_affected(),
            TxContext::Tx(tx) => query.execute(&mut **tx).await?.rows_affected(),
        })
    })
    .await
}

pub async fn mark_dead(ctx: &mut TxContext, id: i64, reason: &str) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query("UPDATE outbound_messages SET status = 'dead', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(reason);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

pub async fn record_error(ctx: &mut TxContext, id: i64, error: &str) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query("UPDATE outbound_messages SET last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}
