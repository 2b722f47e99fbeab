//! Everything one view of an asset class needs, computed in one pass.
//!
//! Rendering never fails. Store and price problems become warnings and the
//! view falls back to defaults: empty holdings, default settings, no history.

use chrono::{DateTime, Utc};
use colored::Colorize;
use tracing::warn;

use crate::error::{StoreError, ValidationError};
use crate::holding::{default_exchange_rate, is_stable_asset, AssetClass, Holding};
use crate::performance::{window_pnl, PeriodPnl, Window};
use crate::portfolio::{Summary, Valuation};
use crate::prices::{NetworkStatus, PriceChain, QuoteOrigin};
use crate::snapshot::{record_if_due, PortfolioSnapshot, SnapshotOutcome, SnapshotPolicy};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassSettings {
    /// USD to local currency.
    pub rate: f64,
    /// Total invested, in local currency.
    pub invested: f64,
}

impl Default for ClassSettings {
    fn default() -> Self {
        ClassSettings {
            rate: default_exchange_rate(),
            invested: 0.0,
        }
    }
}

impl ClassSettings {
    pub fn load(store: &Store, user_id: &str, class: AssetClass) -> Result<ClassSettings, StoreError> {
        let defaults = ClassSettings::default();
        Ok(ClassSettings {
            rate: store
                .get_setting(user_id, &class.rate_key())?
                .unwrap_or(defaults.rate),
            invested: store
                .get_setting(user_id, &class.invested_key())?
                .unwrap_or(defaults.invested),
        })
    }

    pub fn save(&self, store: &Store, user_id: &str, class: AssetClass) -> Result<(), StoreError> {
        store.put_setting(user_id, &class.rate_key(), self.rate)?;
        store.put_setting(user_id, &class.invested_key(), self.invested)
    }

    pub fn with_rate(self, rate: f64) -> Result<ClassSettings, ValidationError> {
        if rate < 0.0 {
            return Err(ValidationError::NegativeRate(rate));
        }
        Ok(ClassSettings { rate, ..self })
    }

    pub fn with_invested(self, invested: f64) -> Result<ClassSettings, ValidationError> {
        if invested < 0.0 {
            return Err(ValidationError::NegativeInvested(invested));
        }
        Ok(ClassSettings { invested, ..self })
    }
}

#[derive(Debug, Clone)]
pub struct ClassView {
    pub class: AssetClass,
    pub settings: ClassSettings,
    pub valuation: Valuation,
    pub summary: Summary,
    pub mtd: PeriodPnl,
    pub ytd: PeriodPnl,
    pub history: Vec<PortfolioSnapshot>,
    /// `None` when no snapshot was attempted.
    pub snapshot: Option<SnapshotOutcome>,
    pub warnings: Vec<String>,
    pub status: NetworkStatus,
}

impl ClassView {
    pub async fn render(
        store: &Store,
        chain: &PriceChain,
        policy: SnapshotPolicy,
        user_id: &str,
        class: AssetClass,
        now: DateTime<Utc>,
    ) -> ClassView {
        let mut warnings = Vec::new();

        let settings = match ClassSettings::load(store, user_id, class) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(class = class.as_str(), "loading settings failed: {e}");
                warnings.push(format!("Could not load {class} settings, using defaults: {e}"));
                ClassSettings::default()
            }
        };

        let holdings: Vec<Holding> = match store.holdings(user_id, class) {
            Ok(holdings) => holdings,
            Err(e) => {
                warn!(class = class.as_str(), "loading holdings failed: {e}");
                warnings.push(format!("Could not load {class} holdings: {e}"));
                Vec::new()
            }
        };

        let symbols: Vec<String> = holdings.iter().map(|h| h.get_symbol().to_string()).collect();
        let board = chain.quotes(&symbols).await;
        warnings.extend(board.warnings.iter().cloned());

        let valuation = Valuation::compute(&holdings, &board.prices(), settings.rate);
        let total = valuation.get_total_value();
        let summary = Summary::new(total, settings.invested);

        // a value built on made-up prices would become the period's baseline
        let unpriced = board
            .quotes
            .values()
            .any(|q| q.origin == QuoteOrigin::Fallback && !is_stable_asset(&q.symbol));
        let snapshot = if unpriced {
            warnings.push("Snapshot skipped: some prices are unavailable".to_string());
            None
        } else {
            match record_if_due(store, policy, user_id, class, total, now) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(class = class.as_str(), "recording snapshot failed: {e}");
                    warnings.push(format!("Could not record snapshot: {e}"));
                    None
                }
            }
        };

        let history = match store.history(user_id, class) {
            Ok(history) => history,
            Err(e) => {
                warn!(class = class.as_str(), "loading history failed: {e}");
                warnings.push(format!("Could not load {class} history: {e}"));
                Vec::new()
            }
        };

        ClassView {
            class,
            settings,
            mtd: window_pnl(&history, total, now, Window::MonthToDate),
            ytd: window_pnl(&history, total, now, Window::YearToDate),
            valuation,
            summary,
            history,
            snapshot,
            warnings,
            status: board.status(),
        }
    }

    pub fn print_warnings(&self) {
        for warning in &self.warnings {
            eprintln!("{}", format!("warning: {warning}").yellow());
        }
    }
}

/// Totals across asset classes for the overview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombinedView {
    pub summary: Summary,
    pub mtd: PeriodPnl,
    pub ytd: PeriodPnl,
    pub status: NetworkStatus,
}

impl CombinedView {
    /// Each class is converted with its own exchange rate before summing.
    pub fn from_views(views: &[ClassView]) -> CombinedView {
        let total: f64 = views.iter().map(|v| v.summary.total_value).sum();
        let invested: f64 = views.iter().map(|v| v.summary.invested).sum();
        let mtd_baseline: f64 = views.iter().map(|v| v.mtd.baseline).sum();
        let ytd_baseline: f64 = views.iter().map(|v| v.ytd.baseline).sum();

        let status = if views.iter().all(|v| v.status == NetworkStatus::Connected) {
            NetworkStatus::Connected
        } else if views.iter().all(|v| v.status == NetworkStatus::Disconnected) {
            NetworkStatus::Disconnected
        } else {
            NetworkStatus::Partial
        };

        CombinedView {
            summary: Summary::new(total, invested),
            mtd: PeriodPnl::new(mtd_baseline, total),
            ytd: PeriodPnl::new(ytd_baseline, total),
            status,
        }
    }

    /// Share of the combined value per asset class, largest first.
    ///
    /// Empty when nothing is worth anything.
    pub fn class_allocation(views: &[ClassView]) -> Vec<(&'static str, f64)> {
        let total: f64 = views.iter().map(|v| v.summary.total_value.max(0.0)).sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut allocation: Vec<(&'static str, f64)> = views
            .iter()
            .filter(|v| v.summary.total_value > 0.0)
            .map(|v| (v.class.title(), v.summary.total_value / total * 100.0))
            .collect();
        allocation.sort_by(|a, b| b.1.total_cmp(&a.1));
        allocation
    }

    pub fn draw_class_pie_chart(views: &[ClassView]) {
        use piechart::{Chart, Color};

        let colors = [Color::Yellow, Color::Blue];
        let data: Vec<piechart::Data> = CombinedView::class_allocation(views)
            .into_iter()
            .enumerate()
            .map(|(i, (label, pct))| piechart::Data {
                label: label.to_string(),
                value: pct as f32,
                color: Some(colors[i % colors.len()].into()),
                fill: '•',
            })
            .collect();

        if data.is_empty() {
            println!("No allocations to display.");
            return;
        }

        Chart::new()
            .legend(true)
            .radius(9)
            .aspect_ratio(3)
            .draw(&data);
    }

    pub fn print(&self, currency: &str, views: &[ClassView]) {
        use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

        let signed = |v: f64, text: String| {
            let color = if v >= 0.0 { Color::Green } else { Color::Red };
            Cell::new(text).set_alignment(CellAlignment::Right).fg(color)
        };

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120)
            .set_header(vec![
                Cell::new("Class").add_attribute(Attribute::Bold),
                Cell::new(format!("Value ({currency})")).add_attribute(Attribute::Bold),
                Cell::new("Invested").add_attribute(Attribute::Bold),
                Cell::new("PnL").add_attribute(Attribute::Bold),
                Cell::new("PnL %").add_attribute(Attribute::Bold),
                Cell::new("MTD").add_attribute(Attribute::Bold),
                Cell::new("YTD").add_attribute(Attribute::Bold),
            ]);

        let rows = views
            .iter()
            .map(|v| (v.class.title(), v.summary, v.mtd, v.ytd))
            .chain(std::iter::once(("TOTAL", self.summary, self.mtd, self.ytd)));
        for (label, summary, mtd, ytd) in rows {
            table.add_row(vec![
                Cell::new(label),
                Cell::new(format!("{:.2}", summary.total_value)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", summary.invested)).set_alignment(CellAlignment::Right),
                signed(summary.pnl, format!("{:.2}", summary.pnl)),
                signed(summary.pnl, format!("{:.2}%", summary.pnl_pct)),
                signed(mtd.pnl, format!("{:.2} ({:.2}%)", mtd.pnl, mtd.pct)),
                signed(ytd.pnl, format!("{:.2} ({:.2}%)", ytd.pnl, ytd.pct)),
            ]);
        }
        println!("{table}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PriceError;
    use crate::prices::PriceSource;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    struct StaticPrices(HashMap<String, f64>);

    #[async_trait]
    impl PriceSource for StaticPrices {
        fn id(&self) -> &'static str {
            "STATIC"
        }

        async fn fetch(&self, symbols: &[String]) -> Result<HashMap<String, f64>, PriceError> {
            Ok(symbols
                .iter()
                .filter_map(|s| self.0.get(s).map(|p| (s.clone(), *p)))
                .collect())
        }
    }

    fn chain(prices: &[(&str, f64)]) -> PriceChain {
        let prices = prices.iter().map(|(s, p)| (s.to_string(), *p)).collect();
        PriceChain::new(vec![Arc::new(StaticPrices(prices))], Duration::from_secs(60))
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_render_new_user_uses_defaults() {
        let store = Store::temporary();
        let view = ClassView::render(
            &store,
            &chain(&[]),
            SnapshotPolicy::Daily,
            "u1",
            AssetClass::Crypto,
            at(2025, 1, 20),
        )
        .await;

        assert_eq!(view.settings, ClassSettings::default());
        assert!(view.valuation.rows.is_empty());
        assert_eq!(view.summary.total_value, 0.0);
        assert_eq!(view.summary.pnl_pct, 0.0);
        assert!(view.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_render_values_records_and_reports_mtd() {
        let store = Store::temporary();
        let settings = ClassSettings { rate: 10.0, invested: 1000.0 };
        settings.save(&store, "u1", AssetClass::Crypto).unwrap();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("BTC", 0.01).unwrap())
            .unwrap();
        let chain = chain(&[("BTC", 10000.0)]);

        let first = ClassView::render(&store, &chain, SnapshotPolicy::Daily, "u1", AssetClass::Crypto, at(2025, 1, 1)).await;
        assert_eq!(first.summary.total_value, 1000.0);
        assert_eq!(first.summary.pnl, 0.0);
        assert!(first.snapshot.as_ref().unwrap().was_recorded());

        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("BTC", 0.015).unwrap())
            .unwrap();
        let later = ClassView::render(&store, &chain, SnapshotPolicy::Daily, "u1", AssetClass::Crypto, at(2025, 1, 20)).await;
        assert_eq!(later.summary.total_value, 1500.0);
        assert_eq!(later.mtd.baseline, 1000.0);
        assert_eq!(later.mtd.pnl, 500.0);
        assert_eq!(later.mtd.pct, 50.0);
        assert_eq!(later.history.len(), 2);
        assert_eq!(later.status, NetworkStatus::Connected);
    }

    #[tokio::test]
    async fn test_render_same_day_records_once() {
        let store = Store::temporary();
        store
            .upsert_holding("u1", AssetClass::Stock, &Holding::new("AAPL", 2.0).unwrap())
            .unwrap();
        let chain = chain(&[("AAPL", 200.0)]);

        for _ in 0..3 {
            ClassView::render(&store, &chain, SnapshotPolicy::Daily, "u1", AssetClass::Stock, at(2025, 2, 3)).await;
        }
        assert_eq!(store.history("u1", AssetClass::Stock).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unpriced_holding_skips_snapshot() {
        let store = Store::temporary();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("XYZ", 5.0).unwrap())
            .unwrap();
        let view = ClassView::render(&store, &chain(&[]), SnapshotPolicy::Daily, "u1", AssetClass::Crypto, at(2025, 2, 3)).await;

        assert!(view.snapshot.is_none());
        assert!(view.history.is_empty());
        assert_eq!(view.status, NetworkStatus::Disconnected);
        assert!(!view.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_combined_view_sums_classes_with_their_own_rates() {
        let store = Store::temporary();
        ClassSettings { rate: 10.0, invested: 500.0 }
            .save(&store, "u1", AssetClass::Crypto)
            .unwrap();
        ClassSettings { rate: 12.0, invested: 1000.0 }
            .save(&store, "u1", AssetClass::Stock)
            .unwrap();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("ETH", 1.0).unwrap())
            .unwrap();
        store
            .upsert_holding("u1", AssetClass::Stock, &Holding::new("AAPL", 1.0).unwrap())
            .unwrap();
        let chain = chain(&[("ETH", 100.0), ("AAPL", 100.0)]);
        let now = at(2025, 3, 1);

        let mut views = Vec::new();
        for class in AssetClass::all() {
            views.push(ClassView::render(&store, &chain, SnapshotPolicy::Daily, "u1", class, now).await);
        }
        let combined = CombinedView::from_views(&views);
        assert_eq!(combined.summary.total_value, 1000.0 + 1200.0);
        assert_eq!(combined.summary.invested, 1500.0);
        assert_eq!(combined.summary.pnl, 700.0);
        assert_eq!(combined.mtd.pnl, 0.0);
        assert_eq!(combined.status, NetworkStatus::Connected);

        let allocation = CombinedView::class_allocation(&views);
        assert_eq!(allocation.len(), 2);
        assert_eq!(allocation[0].0, "Stocks");
        assert!((allocation[0].1 - 1200.0 / 2200.0 * 100.0).abs() < 1e-9);
        let sum: f64 = allocation.iter().map(|(_, pct)| pct).sum();
        assert!((sum - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_class_allocation_skips_empty_classes() {
        let store = Store::temporary();
        store
            .upsert_holding("u1", AssetClass::Crypto, &Holding::new("BTC", 1.0).unwrap())
            .unwrap();
        let chain = chain(&[("BTC", 50.0)]);
        let now = at(2025, 3, 1);

        let mut views = Vec::new();
        for class in AssetClass::all() {
            views.push(ClassView::render(&store, &chain, SnapshotPolicy::Daily, "u1", class, now).await);
        }
        assert_eq!(CombinedView::class_allocation(&views), vec![("Crypto", 100.0)]);
        assert!(CombinedView::class_allocation(&[]).is_empty());
    }

    #[test]
    fn test_settings_reject_negatives() {
        let settings = ClassSettings::default();
        assert!(settings.with_rate(-1.0).is_err());
        assert!(settings.with_invested(-0.5).is_err());
        let updated = settings.with_rate(15.2).unwrap().with_invested(300.0).unwrap();
        assert_eq!(updated, ClassSettings { rate: 15.2, invested: 300.0 });
    }
}
