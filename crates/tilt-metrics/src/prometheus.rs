//! Prometheus text exposition format.
//!
//! Renders a store [`LoadSnapshot`] for scraping by a Prometheus server or
//! compatible agent.

use tilt_state::LoadSnapshot;

/// Render a load snapshot into Prometheus text format.
pub fn render_prometheus(snapshot: &LoadSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# HELP tilt_live_devices Devices with an unexpired reading window.\n");
    out.push_str("# TYPE tilt_live_devices gauge\n");
    out.push_str(&format!("tilt_live_devices {}\n", snapshot.live_devices));

    out.push_str("# HELP tilt_retained_readings Readings held across live windows.\n");
    out.push_str("# TYPE tilt_retained_readings gauge\n");
    out.push_str(&format!(
        "tilt_retained_readings {}\n",
        snapshot.retained_readings
    ));

    out.push_str("# HELP tilt_instance_requests Requests handled in the instance's current window.\n");
    out.push_str("# TYPE tilt_instance_requests gauge\n");
    for load in &snapshot.instances {
        out.push_str(&format!(
            "tilt_instance_requests{{instance=\"{}\"}} {}\n",
            escape_label(&load.instance_id),
            load.count
        ));
    }

    out.push_str("# HELP tilt_sanitized_fields_total Null measurements coerced to zero.\n");
    out.push_str("# TYPE tilt_sanitized_fields_total counter\n");
    out.push_str(&format!(
        "tilt_sanitized_fields_total {}\n",
        snapshot.sanitized_fields
    ));

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
