//! Prometheus text exposition of the live device store.

use netmend_heal::{HealingPolicy, HealingState};
use netmend_state::DeviceEntry;

/// Escape a label value per the exposition format.
fn escape(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('\n', r"\n")
}

fn labels(entry: &DeviceEntry) -> String {
    format!(
        "ip=\"{}\",label=\"{}\",lab=\"{}\"",
        escape(&entry.status.ip),
        escape(&entry.status.label),
        escape(&entry.status.lab_id)
    )
}

fn family(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} {kind}\n"));
}

/// Render every device of a store snapshot.
pub fn render_prometheus(entries: &[DeviceEntry], policy: &HealingPolicy) -> String {
    let mut out = String::new();

    family(&mut out, "netmend_devices", "Number of monitored devices.", "gauge");
    out.push_str(&format!("netmend_devices {}\n", entries.len()));

    family(&mut out, "netmend_device_online", "1 if the primary probe succeeded in the last cycle.", "gauge");
    for e in entries {
        out.push_str(&format!(
            "netmend_device_online{{{}}} {}\n",
            labels(e),
            u8::from(e.status.online)
        ));
    }

    family(&mut out, "netmend_consecutive_failures", "Consecutive failed probe rounds.", "gauge");
    for e in entries {
        out.push_str(&format!(
            "netmend_consecutive_failures{{{}}} {}\n",
            labels(e),
            e.status.consecutive_failures
        ));
    }

    family(&mut out, "netmend_healing_attempts", "Remediation attempts since the last recovery.", "gauge");
    for e in entries {
        out.push_str(&format!(
            "netmend_healing_attempts{{{}}} {}\n",
            labels(e),
            e.healing.attempts
        ));
    }

    family(&mut out, "netmend_healing_exhausted", "1 if remediation is refused until the device recovers.", "gauge");
    for e in entries {
        let exhausted = policy.classify(e) == HealingState::Exhausted;
        out.push_str(&format!(
            "netmend_healing_exhausted{{{}}} {}\n",
            labels(e),
            u8::from(exhausted)
        ));
    }

    family(&mut out, "netmend_latency_ms", "Primary probe latency in milliseconds.", "gauge");
    for e in entries {
        if let Some(latency) = e.status.primary_latency_ms() {
            out.push_str(&format!("netmend_latency_ms{{{}}} {:.2}\n", labels(e), latency));
        }
    }

    out
}
