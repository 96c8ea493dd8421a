use uuid::Uuid;

use crate::error::RepoError;
use crate::tx::TxContext;

/// Append-only; every decoded frame (successful or not) gets a row so a
/// device's recent traffic can be replayed for diagnosis. `device_id` is
/// `None` when a frame fails to decode before its gateway ID could be read.
#[allow(clippy::too_many_arguments)]
pub async fn append_cmd_log(
    ctx: &mut TxContext,
    device_id: Option<Uuid>,
    direction: &str,
    command_code: i32,
    sequence: i64,
    payload_hex: &str,
    parsed_ok: bool,
    reason: Option<&str>,
) -> Result<i64, RepoError> {
    crate::tx::retry_once_on_deadlock(|| async {
        let query = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO cmd_log (device_id, direction, command_code, sequence, payload_hex, parsed_ok, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING id
            "#,
        )
        .bind(device_id)
        .bind(direction)
        .bind(command_code)
        .bind(sequence)
        .bind(payload_hex)
        .bind(parsed_ok)
        .bind(reason);

        Ok(match &mut *ctx {
            TxContext::Pool(pool) => query.fetch_one(&*pool).await?,
            TxContext::Tx(tx) => query.fetch_one(&mut **tx).await?,
        })
    })
    .await
}
