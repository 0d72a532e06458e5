/// Progress reported while bytes move through a download or a copy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub done: u64,
    pub total: Option<u64>,
    /// `None` when the total is unknown (indeterminate progress)
    pub percent: Option<f32>,
}

impl Progress {
    pub fn new(done: u64, total: Option<u64>) -> Self {
        Self {
            done,
            total,
            percent: percent(done, total),
        }
    }
}

/// Percentage of `done` over `total`, clamped to 0..=100.
///
/// A missing or zero total yields `None` so the UI can show an
/// indeterminate bar instead of a NaN or infinite value.
pub fn percent(done: u64, total: Option<u64>) -> Option<f32> {
    match total {
        Some(total) if total > 0 => {
            let value = done as f64 / total as f64 * 100.0;
            Some(value.clamp(0.0, 100.0) as f32)
        }
        _ => None,
    }
}

const MB: f64 = 1f64 / 1024f64 / 1024f64;

/// Human readable "x.y MB / z.w MB" for logs and dialogs
pub fn describe(progress: &Progress) -> String {
    match progress.total {
        Some(total) if total > 0 => format!(
            "{:.1} MB / {:.1} MB",
            progress.done as f64 * MB,
            total as f64 * MB
        ),
        _ => format!("{:.1} MB", progress.done as f64 * MB),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_policy() {
        assert_eq!(percent(50, Some(200)), Some(25.0));
        assert_eq!(percent(200, Some(200)), Some(100.0));
        // Servers sometimes send more than they announce
        assert_eq!(percent(300, Some(200)), Some(100.0));
        assert_eq!(percent(10, Some(0)), None);
        assert_eq!(percent(10, None), None);
    }

    #[test]
    fn test_describe() {
        let p = Progress::new(1024 * 1024, Some(4 * 1024 * 1024));
        assert_eq!(describe(&p), "1.0 MB / 4.0 MB");
        assert_eq!(describe(&Progress::new(0, None)), "0.0 MB");
    }
}
