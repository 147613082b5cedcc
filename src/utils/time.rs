use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::info;

/// Current UTC time as ISO 8601, e.g. "2025-02-05T14:30:00Z".
pub fn utc_now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_unix_secs(secs)
}

fn format_unix_secs(secs: u64) -> String {
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let rem = secs % 86_400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Logs `[STAGE]` banners with elapsed wall time.
pub struct StepTimer {
    name: String,
    start: Instant,
}

impl StepTimer {
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        info!("===== [STAGE] {} =====", name);
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log completion and return the elapsed seconds.
    pub fn finish(self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        info!("----- {} time: {:.2?} -----", self.name, self.elapsed());
        secs
    }
}
