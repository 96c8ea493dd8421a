use chrono::{DateTime, Duration, Utc};

use crate::record::SessionRecord;

pub const W_HB: f64 = 1.0;
pub const W_DROP: f64 = -0.2;
pub const W_ACK: f64 = -0.3;

pub const ONLINE_THRESHOLD: f64 = 0.5;

const FULL_WEIGHT_SECS: i64 = 5 * 60;
const ZERO_WEIGHT_SECS: i64 = 15 * 60;

/// 1.0 for signals within 5 minutes, decaying linearly to 0.0 at 15 minutes,
/// 0.0 beyond that (and for signals in the future, which we clamp to "now").
fn decay(elapsed: Duration) -> f64 {
    let secs = elapsed.num_seconds().max(0);
    if secs <= FULL_WEIGHT_SECS {
        1.0
    } else if secs >= ZERO_WEIGHT_SECS {
        0.0
    } else {
        let span = (ZERO_WEIGHT_SECS - FULL_WEIGHT_SECS) as f64;
        1.0 - (secs - FULL_WEIGHT_SECS) as f64 / span
    }
}

fn decay_at(ts: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    decay(now - ts)
}

/// Weighted online/offline score. Each recent negative signal (a device can
/// have several drops or ack timeouts in its bounded history) contributes
/// its own decayed term, so a flapping device scores lower than one with a
/// single stale drop.
pub fn score(record: &SessionRecord, now: DateTime<Utc>) -> f64 {
    let hb_term = record
        .last_heartbeat_at
        .map(|t| decay_at(t, now))
        .unwrap_or(0.0);
    let drop_term: f64 = record.tcp_drops.iter().map(|t| decay_at(*t, now)).sum();
    let ack_term: f64 = record.ack_timeouts.iter().map(|t| decay_at(*t, now)).sum();

    W_HB * hb_term + W_DROP * drop_term + W_ACK * ack_term
}

pub fn is_online(record: &SessionRecord, now: DateTime<Utc>) -> bool {
    score(record, now) >= ONLINE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ConnHandle;

    #[test]
    fn s5_weighted_online_boundary() {
        let now = Utc::now();
        let mut rec = SessionRecord::new("dev-1", "inst-a", ConnHandle(1), now - Duration::minutes(10));
        rec.last_heartbeat_at = Some(now - Duration::minutes(2));
        rec.push_ack_timeout(now - Duration::minutes(1));
        assert!((score(&rec, now) - 0.7).abs() < 1e-9);
        assert!(is_online(&rec, now));

        rec.push_tcp_drop(now - Duration::seconds(30));
        assert!((score(&rec, now) - 0.5).abs() < 1e-9);
        assert!(is_online(&rec, now), "exactly at threshold is online");

        rec.push_tcp_drop(now - Duration::seconds(20));
        assert!(score(&rec, now) < 0.5);
        assert!(!is_online(&rec, now));
    }

    #[test]
    fn stale_heartbeat_decays_to_zero_past_fifteen_minutes() {
        let now = Utc::now();
        let mut rec = SessionRecord::new("dev-1", "inst-a", ConnHandle(1), now - Duration::hours(1));
        rec.last_heartbeat_at = Some(now - Duration::minutes(20));
        assert_eq!(score(&rec, now), 0.0);
        assert!(!is_online(&rec, now));
    }

    #[test]
    fn no_signals_at_all_is_offline() {
        let now = Utc::now();
        let rec = SessionRecord::new("dev-1", "inst-a", ConnHandle(1), now);
        assert_eq!(score(&rec, now), 0.0);
        assert!(!is_online(&rec, now));
    }
}
