use crate::aggregate::format_count;
use crate::models::{CounterField, GridRow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Line-chart data for a working copy: one x-axis entry per day and one
/// series per counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendChart {
    pub dates: Vec<NaiveDate>,
    pub likes: Vec<u64>,
    pub comments: Vec<u64>,
    pub messages: Vec<u64>,
    pub views: Vec<u64>,
}

impl TrendChart {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a GridRow>) -> Self {
        let mut sorted: Vec<&GridRow> = rows.into_iter().collect();
        sorted.sort_by_key(|row| row.date);

        let mut chart = Self::default();
        for row in sorted {
            chart.dates.push(row.date);
            chart.likes.push(row.counters.likes);
            chart.comments.push(row.counters.comments);
            chart.messages.push(row.counters.messages);
            chart.views.push(row.counters.views);
        }
        chart
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn series(&self, field: CounterField) -> &[u64] {
        match field {
            CounterField::Likes => &self.likes,
            CounterField::Comments => &self.comments,
            CounterField::Messages => &self.messages,
            CounterField::Views => &self.views,
        }
    }

    pub fn peak(&self) -> u64 {
        CounterField::ALL
            .iter()
            .flat_map(|field| self.series(*field).iter().copied())
            .max()
            .unwrap_or(0)
    }

    /// Evenly spaced y-axis labels from zero to the highest plotted value.
    pub fn y_axis_labels(&self, ticks: usize) -> Vec<String> {
        if ticks < 2 {
            return vec![format_count(self.peak())];
        }
        let peak = u128::from(self.peak());
        let steps = (ticks - 1) as u128;
        (0..ticks as u128)
            .map(|index| format_count((peak * index / steps) as u64))
            .collect()
    }
}
