use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::Device;
use crate::tx::TxContext;

/// Idempotent upsert keyed on `phy_id`. A brand-new device gets
/// `protocol_kind` recorded from its first contact; an existing one keeps
/// its original `protocol_kind` even if later frames arrive on a different
/// detected variant (that would indicate a wiring mixup, not a protocol
/// change, and is left for an operator to notice via `CmdLog`).
pub async fn ensure_device(ctx: &mut TxContext, phy_id: &str, protocol_kind: &str, now: DateTime<Utc>) -> Result<Uuid, RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO devices (id, phy_id, protocol_kind, last_seen_at)
            VALUES (gen_random_uuid(), $1, $2, $3)
            ON CONFLICT (phy_id) DO UPDATE SET phy_id = devices.phy_id
            RETURNING id
            "#,
        )
        .bind(phy_id)
        .bind(protocol_kind)
        .bind(now);

        Ok(match &mut *ctx {
            TxContext::Pool(pool) => query.fetch_one(&*pool).await?,
            TxContext::Tx(tx) => query.fetch_one(&mut **tx).await?,
        })
    })
    .await
}

/// Monotonic: never moves `last_seen_at` backwards.
pub async fn touch_device_last_seen(ctx: &mut TxContext, phy_id: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            "UPDATE devices SET last_seen_at = $2 WHERE phy_id = $1 AND last_seen_at < $2",
        )
        .bind(phy_id)
        .bind(at);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

pub async fn update_heartbeat_fields(
    ctx: &mut TxContext,
    phy_id: &str,
    firmware_version: &str,
    rssi: i16,
    iccid: &str,
) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            "UPDATE devices SET firmware_version = $2, rssi = $3, iccid = $4 WHERE phy_id = $1",
        )
        .bind(phy_id)
        .bind(firmware_version)
        .bind(rssi)
        .bind(iccid);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

pub async fn find_by_phy_id(ctx: &mut TxContext, phy_id: &str) -> Result<Option<Device>, RepoError> {
    let query = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE phy_id = $1").bind(phy_id);

    let row = match ctx {
        TxContext::Pool(pool) => query.fetch_optional(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_optional(&mut **tx).await?,
    };
    Ok(row)
}

/// The reverse of [`find_by_phy_id`], needed wherever a caller only has a
/// foreign key (outbound messages, cmd log rows) and must resolve the
/// session/connection-registry key back out of it.
pub async fn find_by_id(ctx: &mut TxContext, device_id: Uuid) -> Result<Option<Device>, RepoError> {
    let query = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1").bind(device_id);

    let row = match ctx {
        TxContext::Pool(pool) => query.fetch_optional(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_optional(&mut **tx).await?,
    };
    Ok(row)
}
