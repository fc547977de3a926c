use crate::models::{CounterMaxima, DailyMetricRow};

/// Per-counter historical peak over every stored row of a work.
pub fn project_maxima<'a>(rows: impl IntoIterator<Item = &'a DailyMetricRow>) -> CounterMaxima {
    rows.into_iter().fold(CounterMaxima::default(), |mut maxima, row| {
        maxima.absorb(&row.counters);
        maxima
    })
}

/// Compact badge label: `12.3w` from ten thousand, `1.5k` from one thousand.
pub fn format_count(value: u64) -> String {
    if value >= 10_000 {
        format!("{:.1}w", value as f64 / 10_000.0)
    } else if value >= 1_000 {
        format!("{:.1}k", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}
