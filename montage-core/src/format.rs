//! Small display helpers shared by the CLI and progress reporting.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_file_size(bytes_per_sec.max(0.0) as u64))
}

pub fn format_eta(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => {
            if s < 60.0 {
                format!("{}s", s.round() as u64)
            } else {
                let mins = (s / 60.0).floor() as u64;
                let secs = (s % 60.0).round() as u64;
                format!("{}m {}s", mins, secs)
            }
        }
        _ => "--".to_string(),
    }
}
