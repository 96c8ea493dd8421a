use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Plain atomic counters, hand-formatted to Prometheus text by
/// `services/gateway`'s admin HTTP `/metrics` route. No metrics crate is
/// pulled in for this — the Non-goals exclude a full metrics surface, this
/// is just enough for an operator to eyeball.
#[derive(Default)]
pub struct Metrics {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicI64,
    pub frames_decoded: AtomicU64,
    pub frames_decode_failed: AtomicU64,
    pub connections_closed_decode_errors: AtomicU64,
    pub outbound_enqueued: AtomicU64,
    pub outbound_sent: AtomicU64,
    pub outbound_acked: AtomicU64,
    pub outbound_dead: AtomicU64,
    pub outbound_in_flight: AtomicI64,
    pub outbound_rejected_overloaded: AtomicU64,
}

impl Metrics {
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        macro_rules! line {
            ($name:literal, $field:ident) => {
                out.push_str(&format!(
                    "# TYPE {0} counter\n{0} {1}\n",
                    $name,
                    self.$field.load(Ordering::Relaxed)
                ));
            };
        }
        line!("gw_connections_accepted_total", connections_accepted);
        out.push_str(&format!(
            "# TYPE gw_connections_active gauge\ngw_connections_active {}\n",
            self.connections_active.load(Ordering::Relaxed)
        ));
        line!("gw_frames_decoded_total", frames_decoded);
        line!("gw_frames_decode_failed_total", frames_decode_failed);
        line!(
            "gw_connections_closed_decode_errors_total",
            connections_closed_decode_errors
        );
        line!("gw_outbound_enqueued_total", outbound_enqueued);
        line!("gw_outbound_sent_total", outbound_sent);
        line!("gw_outbound_acked_total", outbound_acked);
        line!("gw_outbound_dead_total", outbound_dead);
        out.push_str(&format!(
            "# TYPE gw_outbound_in_flight gauge\ngw_outbound_in_flight {}\n",
            self.outbound_in_flight.load(Ordering::Relaxed)
        ));
        line!("gw_outbound_rejected_overloaded_total", outbound_rejected_overloaded);
        out
    }
}
