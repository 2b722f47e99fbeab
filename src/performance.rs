use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::snapshot::PortfolioSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    MonthToDate,
    YearToDate,
}

impl Window {
    pub fn label(&self) -> &'static str {
        match self {
            Window::MonthToDate => "MTD",
            Window::YearToDate => "YTD",
        }
    }

    fn contains(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Window::MonthToDate => {
                timestamp.year() == now.year() && timestamp.month() == now.month()
            }
            Window::YearToDate => timestamp.year() == now.year(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodPnl {
    pub baseline: f64,
    pub pnl: f64,
    pub pct: f64,
}

impl PeriodPnl {
    pub fn new(baseline: f64, current: f64) -> PeriodPnl {
        let pnl = current - baseline;
        let pct = if baseline != 0.0 {
            pnl / baseline * 100.0
        } else {
            0.0
        };
        PeriodPnl { baseline, pnl, pct }
    }
}

/// Profit since the first snapshot of the current calendar month or year.
///
/// Without a snapshot in the window the current value is its own baseline.
pub fn window_pnl(
    history: &[PortfolioSnapshot],
    current: f64,
    now: DateTime<Utc>,
    window: Window,
) -> PeriodPnl {
    let baseline = history
        .iter()
        .filter(|s| window.contains(s.timestamp, now))
        .min_by_key(|s| s.timestamp)
        .map(|s| s.value)
        .unwrap_or(current);
    PeriodPnl::new(baseline, current)
}

/// Daily candle derived from closing values, not intraday prices.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }
}

pub fn daily_candles(history: &[PortfolioSnapshot]) -> Vec<Candle> {
    let mut sorted: Vec<&PortfolioSnapshot> = history.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);

    // last value of each day is that day's close
    let mut closes: Vec<(NaiveDate, f64)> = Vec::new();
    for snapshot in sorted {
        let date = snapshot.timestamp.date_naive();
        match closes.last_mut() {
            Some((last_date, close)) if *last_date == date => *close = snapshot.value,
            _ => closes.push((date, snapshot.value)),
        }
    }

    let mut candles = Vec::with_capacity(closes.len());
    let mut previous_close: Option<f64> = None;
    for (date, close) in closes {
        let open = previous_close.unwrap_or(close);
        candles.push(Candle {
            date,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
        });
        previous_close = Some(close);
    }
    candles
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyClose {
    pub year: i32,
    pub month: u32,
    pub first: f64,
    pub last: f64,
    pub change: PeriodPnl,
}

/// Groups snapshots by calendar month, oldest month first.
pub fn monthly_closes(history: &[PortfolioSnapshot]) -> Vec<MonthlyClose> {
    let mut sorted: Vec<&PortfolioSnapshot> = history.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);

    let mut months: Vec<MonthlyClose> = Vec::new();
    for snapshot in sorted {
        let (year, month) = (snapshot.timestamp.year(), snapshot.timestamp.month());
        match months.last_mut() {
            Some(m) if m.year == year && m.month == month => {
                m.last = snapshot.value;
                m.change = PeriodPnl::new(m.first, m.last);
            }
            _ => months.push(MonthlyClose {
                year,
                month,
                first: snapshot.value,
                last: snapshot.value,
                change: PeriodPnl::new(snapshot.value, snapshot.value),
            }),
        }
    }
    months
}

pub fn print_performance(
    currency: &str,
    current: f64,
    mtd: &PeriodPnl,
    ytd: &PeriodPnl,
    history: &[PortfolioSnapshot],
) {
    use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table};

    let colorize_pct = |v: f64| {
        let c = if v >= 0.0 { TColor::Green } else { TColor::Red };
        Cell::new(format!("{v:.2}%")).set_alignment(CellAlignment::Right).fg(c)
    };
    let colorize_money = |v: f64| {
        let c = if v >= 0.0 { TColor::Green } else { TColor::Red };
        Cell::new(format!("{v:.2}")).set_alignment(CellAlignment::Right).fg(c)
    };

    let mut summary = Table::new();
    summary
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(100)
        .set_header(vec![
            Cell::new("Period").add_attribute(Attribute::Bold),
            Cell::new(format!("Baseline ({currency})")).add_attribute(Attribute::Bold),
            Cell::new(format!("Now ({currency})")).add_attribute(Attribute::Bold),
            Cell::new("PnL").add_attribute(Attribute::Bold),
            Cell::new("%").add_attribute(Attribute::Bold),
        ]);

    for (label, period) in [("MTD", mtd), ("YTD", ytd)] {
        summary.add_row(vec![
            Cell::new(label),
            Cell::new(format!("{:.2}", period.baseline)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{current:.2}")).set_alignment(CellAlignment::Right),
            colorize_money(period.pnl),
            colorize_pct(period.pct),
        ]);
    }
    println!("{summary}");

    let months = monthly_closes(history);
    if months.is_empty() {
        return;
    }

    let mut monthly = Table::new();
    monthly
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(100)
        .set_header(vec![
            Cell::new("Month").add_attribute(Attribute::Bold),
            Cell::new("First").add_attribute(Attribute::Bold),
            Cell::new("Last").add_attribute(Attribute::Bold),
            Cell::new("Change").add_attribute(Attribute::Bold),
            Cell::new("%").add_attribute(Attribute::Bold),
        ]);
    for m in months {
        monthly.add_row(vec![
            Cell::new(format!("{}-{:02}", m.year, m.month)),
            Cell::new(format!("{:.2}", m.first)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", m.last)).set_alignment(CellAlignment::Right),
            colorize_money(m.change.pnl),
            colorize_pct(m.change.pct),
        ]);
    }
    println!("{monthly}");
}

pub fn print_history(currency: &str, history: &[PortfolioSnapshot]) {
    use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(100)
        .set_header(vec![
            Cell::new("Date").add_attribute(Attribute::Bold),
            Cell::new("Open").add_attribute(Attribute::Bold),
            Cell::new("High").add_attribute(Attribute::Bold),
            Cell::new("Low").add_attribute(Attribute::Bold),
            Cell::new(format!("Close ({currency})")).add_attribute(Attribute::Bold),
        ]);

    for candle in daily_candles(history) {
        let c = if candle.is_up() { TColor::Green } else { TColor::Red };
        table.add_row(vec![
            Cell::new(candle.date.to_string()),
            Cell::new(format!("{:.2}", candle.open)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", candle.high)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", candle.low)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}", candle.close)).set_alignment(CellAlignment::Right).fg(c),
        ]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holding::AssetClass;
    use chrono::TimeZone;

    fn snap(y: i32, m: u32, d: u32, h: u32, value: f64) -> PortfolioSnapshot {
        let timestamp = Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap();
        PortfolioSnapshot {
            user_id: "u1".to_string(),
            asset_class: AssetClass::Crypto,
            period: timestamp.format("%Y-%m-%dT%H").to_string(),
            timestamp,
            value,
        }
    }

    #[test]
    fn test_mtd_uses_first_snapshot_of_month() {
        let history = vec![snap(2025, 1, 1, 0, 100.0), snap(2025, 1, 15, 0, 120.0)];
        let now = Utc.with_ymd_and_hms(2025, 1, 20, 0, 0, 0).unwrap();

        let mtd = window_pnl(&history, 150.0, now, Window::MonthToDate);
        assert_eq!(mtd.baseline, 100.0);
        assert_eq!(mtd.pnl, 50.0);
        assert_eq!(mtd.pct, 50.0);
    }

    #[test]
    fn test_ytd_spans_months_but_not_years() {
        let history = vec![
            snap(2024, 12, 31, 0, 80.0),
            snap(2025, 2, 1, 0, 200.0),
            snap(2025, 3, 1, 0, 220.0),
        ];
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();

        let ytd = window_pnl(&history, 250.0, now, Window::YearToDate);
        assert_eq!(ytd.baseline, 200.0);
        assert_eq!(ytd.pnl, 50.0);
        assert_eq!(ytd.pct, 25.0);
    }

    #[test]
    fn test_same_month_of_previous_year_is_not_mtd() {
        let history = vec![snap(2024, 3, 2, 0, 10.0)];
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let mtd = window_pnl(&history, 40.0, now, Window::MonthToDate);
        assert_eq!(mtd, PeriodPnl { baseline: 40.0, pnl: 0.0, pct: 0.0 });
    }

    #[test]
    fn test_empty_history_and_zero_baseline() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let empty = window_pnl(&[], 75.0, now, Window::YearToDate);
        assert_eq!(empty.pnl, 0.0);
        assert_eq!(empty.pct, 0.0);

        let zero = window_pnl(&[snap(2025, 3, 1, 0, 0.0)], 75.0, now, Window::MonthToDate);
        assert_eq!(zero.pnl, 75.0);
        assert_eq!(zero.pct, 0.0);
    }

    #[test]
    fn test_daily_candles_use_last_value_per_day() {
        let history = vec![
            snap(2025, 1, 2, 16, 130.0),
            snap(2025, 1, 1, 8, 100.0),
            snap(2025, 1, 2, 0, 90.0),
            snap(2025, 1, 3, 0, 120.0),
        ];
        let candles = daily_candles(&history);
        assert_eq!(candles.len(), 3);

        assert_eq!((candles[0].open, candles[0].close), (100.0, 100.0));
        assert_eq!(candles[1].open, 100.0);
        assert_eq!(candles[1].close, 130.0);
        assert_eq!((candles[1].low, candles[1].high), (100.0, 130.0));
        assert!(candles[1].is_up());
        assert!(!candles[2].is_up());
        assert_eq!((candles[2].low, candles[2].high), (120.0, 130.0));
    }

    #[test]
    fn test_monthly_closes_group_by_calendar_month() {
        let history = vec![
            snap(2025, 1, 1, 0, 100.0),
            snap(2025, 1, 31, 0, 110.0),
            snap(2025, 2, 3, 0, 90.0),
        ];
        let months = monthly_closes(&history);
        assert_eq!(months.len(), 2);
        assert_eq!((months[0].year, months[0].month), (2025, 1));
        assert_eq!(months[0].change.pnl, 10.0);
        assert_eq!(months[0].change.pct, 10.0);
        assert_eq!(months[1].first, 90.0);
        assert_eq!(months[1].change.pnl, 0.0);
    }
}
