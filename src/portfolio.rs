use std::collections::HashMap;

use piechart::{Chart, Color};

use crate::holding::Holding;

#[derive(Debug, Clone, PartialEq)]
pub struct AssetValue {
    pub symbol: String,
    pub quantity: f64,
    pub usd_price: f64,
    pub value_usd: f64,
    pub value_local: f64,
}

/// Holdings of one asset class priced in USD and converted to the local currency.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Valuation {
    pub rows: Vec<AssetValue>,
    pub rate: f64,
}

impl Valuation {
    /// Values every holding at `price × quantity × rate`.
    ///
    /// A missing price counts as 0, or as 1.0 for stable-value assets.
    pub fn compute(holdings: &[Holding], prices: &HashMap<String, f64>, rate: f64) -> Valuation {
        let rows = holdings
            .iter()
            .map(|holding| {
                let default_price = if holding.is_stable() { 1.0 } else { 0.0 };
                let usd_price = prices
                    .get(holding.get_symbol())
                    .copied()
                    .unwrap_or(default_price);
                let value_usd = usd_price * holding.get_quantity();
                AssetValue {
                    symbol: holding.get_symbol().to_string(),
                    quantity: holding.get_quantity(),
                    usd_price,
                    value_usd,
                    value_local: value_usd * rate,
                }
            })
            .collect();
        Valuation { rows, rate }
    }

    pub fn get_total_usd(&self) -> f64 {
        self.rows.iter().map(|r| r.value_usd).sum()
    }

    pub fn get_total_value(&self) -> f64 {
        self.rows.iter().map(|r| r.value_local).sum()
    }

    /// Share of each asset in the local-currency total, largest first.
    pub fn get_allocation(&self) -> Vec<(String, f64)> {
        let total_value = self.get_total_value();
        if total_value <= 0.0 {
            return Vec::new();
        }

        let mut allocation: Vec<(String, f64)> = self
            .rows
            .iter()
            .filter(|r| r.value_local > 0.0)
            .map(|r| (r.symbol.clone(), r.value_local / total_value * 100.0))
            .collect();
        allocation.sort_by(|a, b| b.1.total_cmp(&a.1));
        allocation
    }

    // Print the valuation as a table
    pub fn print(&self, currency: &str, include_sum: bool) {
        use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, ContentArrangement, Table};

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120);

        table.set_header(vec![
            Cell::new("Asset").add_attribute(Attribute::Bold),
            Cell::new("Qty").add_attribute(Attribute::Bold),
            Cell::new("Price (USD)").add_attribute(Attribute::Bold),
            Cell::new("Value (USD)").add_attribute(Attribute::Bold),
            Cell::new(format!("Value ({currency})")).add_attribute(Attribute::Bold),
        ]);

        for row in &self.rows {
            table.add_row(vec![
                Cell::new(&row.symbol),
                Cell::new(format!("{:.4}", row.quantity)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", row.usd_price)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", row.value_usd)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.2}", row.value_local)).set_alignment(CellAlignment::Right),
            ]);
        }

        if include_sum {
            table.add_row(vec![
                Cell::new("TOTAL").add_attribute(Attribute::Bold),
                Cell::new(""),
                Cell::new(""),
                Cell::new(format!("{:.2}", self.get_total_usd()))
                    .set_alignment(CellAlignment::Right)
                    .add_attribute(Attribute::Bold),
                Cell::new(format!("{:.2}", self.get_total_value()))
                    .set_alignment(CellAlignment::Right)
                    .add_attribute(Attribute::Bold),
            ]);
        }

        println!("{table}");
    }

    // Print the allocation in descending order %-wise
    pub fn print_allocation(&self) {
        println!("====================================");
        for (symbol, percentage) in self.get_allocation() {
            println!("{symbol: >12} | {percentage: >10.2}");
        }
    }

    pub fn draw_pie_chart(&self) {
        let colors = [
            Color::Red,
            Color::Green,
            Color::Blue,
            Color::Yellow,
            Color::Cyan,
            Color::White,
            Color::Purple,
            Color::Black,
        ];

        let data: Vec<piechart::Data> = self
            .rows
            .iter()
            .filter(|r| r.value_local > 0.0)
            .enumerate()
            .map(|(i, row)| piechart::Data {
                label: row.symbol.clone(),
                value: row.value_local as f32,
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
}

/// All-time result of an asset class against the amount invested.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Summary {
    pub total_value: f64,
    pub invested: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

impl Summary {
    pub fn new(total_value: f64, invested: f64) -> Summary {
        let pnl = total_value - invested;
        let pnl_pct = if invested > 0.0 {
            pnl / invested * 100.0
        } else {
            0.0
        };
        Summary {
            total_value,
            invested,
            pnl,
            pnl_pct,
        }
    }

    pub fn print(&self, currency: &str) {
        use colored::Colorize;

        let pnl = format!("{currency} {:.2} ({:.2}%)", self.pnl, self.pnl_pct);
        println!("Total Value:    {currency} {:.2}", self.total_value);
        println!("Total Invested: {currency} {:.2}", self.invested);
        if self.pnl >= 0.0 {
            println!("All-Time PnL:   {}", pnl.green());
        } else {
            println!("All-Time PnL:   {}", pnl.red());
        }
    }
}
