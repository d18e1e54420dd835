//! Kubernetes resource quantity parsing
//!
//! Converts quantity strings as served by the API server and metrics-server
//! (`250m`, `1`, `123456789n`, `128Mi`, `1G`) into millicores and bytes.

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millicores(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let (number, scale) = if let Some(n) = quantity.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(u) = quantity.strip_suffix('u') {
        (u, 1e-3)
    } else if let Some(m) = quantity.strip_suffix('m') {
        (m, 1.0)
    } else {
        (quantity, 1000.0)
    };

    parse_number(number).map(|value| value * scale)
}

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<f64> {
    const BINARY: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ];
    const DECIMAL: &[(&str, f64)] = &[
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
        ("m", 1e-3),
    ];

    let quantity = quantity.trim();
    for (suffix, scale) in BINARY.iter().chain(DECIMAL) {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return parse_number(number).map(|value| value * scale);
        }
    }

    parse_number(quantity)
}

/// Percentage of `usage` against `limit`, 0 when either side is 0
pub fn percentage(usage: f64, limit: f64) -> f64 {
    if usage == 0.0 || limit == 0.0 {
        return 0.0;
    }
    usage * 100.0 / limit
}

fn parse_number(number: &str) -> Option<f64> {
    if number.is_empty() {
        return None;
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}
