use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RepoError;
use crate::models::Port;
use crate::tx::TxContext;

/// Conflict target `(device_id, port_no)`. The `WHERE` clause on the
/// `DO UPDATE` makes this monotonic in `updated_at`: a stale report never
/// overwrites a newer one, satisfying the invariant directly in SQL rather
/// than via a read-then-compare round trip.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_port_snapshot(
    ctx: &mut TxContext,
    device_id: Uuid,
    port_no: i16,
    status_bits: i16,
    power_centiwatt: i32,
    voltage_decivolt: i32,
    current_centiamp: i32,
    energy_0p01kwh: i64,
    duration_sec: i64,
    updated_at: DateTime<Utc>,
) -> Result<(), RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query(
            r#"
            INSERT INTO ports (device_id, port_no, status_bits, power_centiwatt, voltage_decivolt,
                                current_centiamp, energy_0p01kwh, duration_sec, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (device_id, port_no) DO UPDATE SET
                status_bits = EXCLUDED.status_bits,
                power_centiwatt = EXCLUDED.power_centiwatt,
                voltage_decivolt = EXCLUDED.voltage_decivolt,
                current_centiamp = EXCLUDED.current_centiamp,
                energy_0p01kwh = EXCLUDED.energy_0p01kwh,
                duration_sec = EXCLUDED.duration_sec,
                updated_at = EXCLUDED.updated_at
            WHERE EXCLUDED.updated_at >= ports.updated_at
            "#,
        )
        .bind(device_id)
        .bind(port_no)
        .bind(status_bits)
        .bind(power_centiwatt)
        .bind(voltage_decivolt)
        .bind(current_centiamp)
        .bind(energy_0p01kwh)
        .bind(duration_sec)
        .bind(updated_at);

        match &mut *ctx {
            TxContext::Pool(pool) => query.execute(&*pool).await?,
            TxContext::Tx(tx) => query.execute(&mut **tx).await?,
        };
        Ok(())
    })
    .await
}

pub async fn find_port(ctx: &mut TxContext, device_id: Uuid, port_no: i16) -> Result<Option<Port>, RepoError> {
    let query = sqlx::query_as::<_, Port>("SELECT * FROM ports WHERE device_id = $1 AND port_no = $2")
        .bind(device_id)
        .bind(port_no);

    let row = match ctx {
        TxContext::Pool(pool) => query.fetch_optional(&*pool).await?,
        TxContext::Tx(tx) => query.fetch_optional(&mut **tx).await?,
    };
    Ok(row)
}
