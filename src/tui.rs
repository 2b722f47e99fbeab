use crate::auth::User;
use crate::config::Config;
use crate::dashboard::{ClassView, CombinedView};
use crate::holding::{parse_quantity, AssetClass, Holding};
use crate::performance::PeriodPnl;
use crate::prices::{NetworkStatus, PriceChain};
use crate::snapshot::SnapshotPolicy;
use crate::store::Store;
use chrono::{TimeZone, Utc};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, Gauge, GraphType, Paragraph, Row, Table,
        Tabs, Wrap,
    },
    Frame, Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};
use tui_big_text::{BigText, PixelSize};

fn format_with_commas(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (integer_part, decimal_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let digits: Vec<char> = integer_part.chars().collect();
    let mut grouped = String::new();
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit);
    }

    let sign = if value < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{decimal_part}")
}

fn format_money(value: f64, currency: &str) -> String {
    format!("{currency} {}", format_with_commas(value))
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else if amount >= 1.0 {
        format!("{amount:.2}")
    } else if amount >= 0.01 {
        format!("{amount:.4}")
    } else {
        format!("{amount:.8}")
    }
}

fn pnl_color(value: f64) -> Color {
    if value >= 0.0 {
        Color::Green
    } else {
        Color::Red
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    Overview,
    Crypto,
    Stocks,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppMode {
    Normal,
    Edit,
}

impl Tab {
    fn title(self) -> &'static str {
        match self {
            Tab::Overview => "Overview",
            Tab::Crypto => AssetClass::Crypto.title(),
            Tab::Stocks => AssetClass::Stock.title(),
        }
    }

    fn all() -> &'static [Tab] {
        &[Tab::Overview, Tab::Crypto, Tab::Stocks]
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "overview" => Some(Tab::Overview),
            "crypto" => Some(Tab::Crypto),
            "stock" | "stocks" => Some(Tab::Stocks),
            _ => None,
        }
    }

    /// Asset class shown on the tab, `None` for the overview.
    fn class(self) -> Option<AssetClass> {
        match self {
            Tab::Overview => None,
            Tab::Crypto => Some(AssetClass::Crypto),
            Tab::Stocks => Some(AssetClass::Stock),
        }
    }
}

pub struct App {
    pub current_tab: Tab,
    pub views: Vec<ClassView>,
    pub combined: Option<CombinedView>,
    pub should_quit: bool,
    pub error_message: Option<String>,
    pub currency: String,
    pub flash_state: bool,
    pub mode: AppMode,
    pub selected_position: usize,
    pub edit_input: String,
    pub view_receiver: Option<mpsc::UnboundedReceiver<Vec<ClassView>>>,
    pub network_status: NetworkStatus,
    store: Store,
    user: User,
    refresh: Arc<Notify>,
}

impl App {
    pub fn new(currency: String, store: Store, user: User, refresh: Arc<Notify>) -> App {
        App {
            current_tab: Tab::Overview,
            views: Vec::new(),
            combined: None,
            should_quit: false,
            error_message: None,
            currency,
            flash_state: false,
            mode: AppMode::Normal,
            selected_position: 0,
            edit_input: String::new(),
            view_receiver: None,
            network_status: NetworkStatus::Connected,
            store,
            user,
            refresh,
        }
    }

    pub fn set_view_receiver(&mut self, receiver: mpsc::UnboundedReceiver<Vec<ClassView>>) {
        self.view_receiver = Some(receiver);
    }

    pub fn try_receive_views(&mut self) -> bool {
        if let Some(receiver) = &mut self.view_receiver {
            if let Ok(views) = receiver.try_recv() {
                self.set_views(views);
                return true;
            }
        }
        false
    }

    pub fn set_views(&mut self, views: Vec<ClassView>) {
        let combined = CombinedView::from_views(&views);
        self.network_status = combined.status;
        self.combined = Some(combined);
        self.views = views;
        self.clamp_selection();
        self.mark_refreshed();
    }

    pub fn mark_refreshed(&mut self) {
        self.flash_state = !self.flash_state;
    }

    fn current_view(&self) -> Option<&ClassView> {
        let class = self.current_tab.class()?;
        self.views.iter().find(|v| v.class == class)
    }

    fn holding_count(&self) -> usize {
        self.current_view().map_or(0, |v| v.valuation.rows.len())
    }

    fn clamp_selection(&mut self) {
        self.selected_position = self
            .selected_position
            .min(self.holding_count().saturating_sub(1));
    }

    pub fn next_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.select_tab(tabs[(current_index + 1) % tabs.len()]);
    }

    pub fn previous_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.select_tab(tabs[(current_index + tabs.len() - 1) % tabs.len()]);
    }

    pub fn select_tab(&mut self, tab: Tab) {
        if tab != self.current_tab {
            self.current_tab = tab;
            self.selected_position = 0;
        }
    }

    pub fn select_next(&mut self) {
        if self.selected_position < self.holding_count().saturating_sub(1) {
            self.selected_position += 1;
        }
    }

    pub fn select_previous(&mut self) {
        if self.selected_position > 0 {
            self.selected_position -= 1;
        }
    }

    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn enter_edit_mode(&mut self) {
        let quantity = self
            .current_view()
            .and_then(|v| v.valuation.rows.get(self.selected_position))
            .map(|row| row.quantity);
        if let Some(quantity) = quantity {
            self.mode = AppMode::Edit;
            self.edit_input = if quantity.fract() == 0.0 {
                format!("{}", quantity as i64)
            } else {
                format!("{quantity}")
            };
        }
    }

    pub fn exit_edit_mode(&mut self) {
        self.mode = AppMode::Normal;
        self.edit_input.clear();
    }

    /// Saves the edited quantity and asks the background task for fresh numbers.
    pub fn save_edit(&mut self) -> Result<(), String> {
        let class = self
            .current_tab
            .class()
            .ok_or_else(|| "No holdings on this tab".to_string())?;
        let quantity = parse_quantity(&self.edit_input).map_err(|e| e.to_string())?;

        let view = self
            .views
            .iter_mut()
            .find(|v| v.class == class)
            .ok_or_else(|| "Portfolio is still loading".to_string())?;
        let row = view
            .valuation
            .rows
            .get_mut(self.selected_position)
            .ok_or_else(|| "Invalid holding selected".to_string())?;

        let holding = Holding::new(&row.symbol, quantity).map_err(|e| e.to_string())?;
        self.store
            .upsert_holding(&self.user.id, class, &holding)
            .map_err(|e| format!("Could not save holding: {e}"))?;

        // show the new quantity right away, the refresh brings the totals
        row.quantity = quantity;
        row.value_usd = row.usd_price * quantity;
        row.value_local = row.value_usd * view.valuation.rate;

        self.request_refresh();
        self.exit_edit_mode();
        Ok(())
    }
}

pub async fn run_tui(
    cfg: Config,
    store: Store,
    policy: SnapshotPolicy,
    user: User,
    tab: Option<Tab>,
) -> eyre::Result<()> {
    let refresh = Arc::new(Notify::new());
    let mut app = App::new(cfg.currency.clone(), store.clone(), user.clone(), refresh.clone());
    if let Some(tab) = tab {
        app.current_tab = tab;
    }

    // Create channel for background view updates
    let (view_sender, view_receiver) = mpsc::unbounded_channel();
    app.set_view_receiver(view_receiver);

    let refresh_every = Duration::from_secs(cfg.refresh_interval_secs.max(1));
    tokio::spawn(async move {
        let chains: Vec<(AssetClass, PriceChain)> = AssetClass::all()
            .into_iter()
            .map(|class| (class, PriceChain::for_class(class, &cfg)))
            .collect();
        let mut interval = tokio::time::interval(refresh_every);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = refresh.notified() => {}
            }
            let mut views = Vec::with_capacity(chains.len());
            for (class, chain) in &chains {
                views.push(ClassView::render(&store, chain, policy, &user.id, *class, Utc::now()).await);
            }
            if view_sender.send(views).is_err() {
                break; // Channel closed, exit task
            }
        }
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    info!("dashboard started");

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = &res {
        warn!("dashboard stopped: {err}");
    }
    Ok(res?)
}

fn handle_normal_key(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => {
            app.should_quit = true;
        }
        // Vim navigation - hjkl
        KeyCode::Char('h') | KeyCode::Left | KeyCode::BackTab => app.previous_tab(),
        KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => app.next_tab(),
        KeyCode::Char('j') | KeyCode::Down => app.select_next(),
        KeyCode::Char('k') | KeyCode::Up => app.select_previous(),
        KeyCode::Char('e') | KeyCode::Enter => app.enter_edit_mode(),
        KeyCode::Char('r') => app.request_refresh(),
        KeyCode::Char('1') => app.select_tab(Tab::Overview),
        KeyCode::Char('2') => app.select_tab(Tab::Crypto),
        KeyCode::Char('3') => app.select_tab(Tab::Stocks),
        _ => {}
    }
}

fn handle_edit_key(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Esc => app.exit_edit_mode(),
        KeyCode::Enter => {
            if let Err(e) = app.save_edit() {
                app.error_message = Some(e);
                app.exit_edit_mode();
            }
        }
        KeyCode::Backspace => {
            app.edit_input.pop();
        }
        KeyCode::Char(c) => {
            if c.is_ascii_digit() || (c == '.' && !app.edit_input.contains('.')) {
                app.edit_input.push(c);
            }
        }
        _ => {}
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        // Check for view updates from background task (non-blocking)
        app.try_receive_views();

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if app.error_message.take().is_some() {
                        continue;
                    }
                    match app.mode {
                        AppMode::Normal => handle_normal_key(app, key.code),
                        AppMode::Edit => handle_edit_key(app, key.code),
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(f.area());

    let tab_titles: Vec<Line> = Tab::all()
        .iter()
        .map(|t| {
            let style = if *t == app.current_tab {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(Span::styled(t.title(), style))
        })
        .collect();

    let tabs = Tabs::new(tab_titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(Line::from(vec![
                    Span::raw(format!("investrack - {} ", app.user.email)),
                    network_indicator(app.network_status),
                ])),
        )
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow))
        .select(
            Tab::all()
                .iter()
                .position(|&t| t == app.current_tab)
                .unwrap_or(0),
        );
    f.render_widget(tabs, chunks[0]);

    match app.current_tab {
        Tab::Overview => render_overview(f, chunks[1], app),
        Tab::Crypto | Tab::Stocks => render_class(f, chunks[1], app),
    }

    if let Some(error) = &app.error_message {
        render_error_popup(f, error);
    }
}

fn network_indicator(status: NetworkStatus) -> Span<'static> {
    match status {
        NetworkStatus::Connected => Span::styled("● live", Style::default().fg(Color::Green)),
        NetworkStatus::Partial => Span::styled("● partial", Style::default().fg(Color::Yellow)),
        NetworkStatus::Disconnected => Span::styled("● offline", Style::default().fg(Color::Red)),
    }
}

fn pnl_cell(pnl: &PeriodPnl, currency: &str) -> Cell<'static> {
    Cell::from(format!("{} ({:.2}%)", format_money(pnl.pnl, currency), pnl.pct))
        .style(Style::default().fg(pnl_color(pnl.pnl)))
}

fn render_overview(f: &mut Frame, area: Rect, app: &App) {
    let Some(combined) = &app.combined else {
        render_loading(f, area);
        return;
    };

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Min(0),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    // Total portfolio value across classes
    let big_text_value = format_money(combined.summary.total_value, &app.currency);
    let big_text = BigText::builder()
        .pixel_size(PixelSize::Quadrant)
        .style(
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
        .lines(vec![big_text_value.clone().into()])
        .build();

    let big_text_widget = Block::default()
        .borders(Borders::ALL)
        .title(format!("Total Portfolio Value ({})", app.currency))
        .title_alignment(Alignment::Center);
    f.render_widget(big_text_widget, main_chunks[0]);

    // Center the big text within the widget
    let inner = main_chunks[0].inner(ratatui::layout::Margin {
        horizontal: 1,
        vertical: 1,
    });
    let big_text_width = big_text_value.len() as u16 * 4; // Approximate width per character in big text
    let centered_area = if big_text_width < inner.width {
        let margin = (inner.width - big_text_width) / 2;
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(margin),
                Constraint::Min(0),
                Constraint::Length(margin),
            ])
            .split(inner)[1]
    } else {
        inner
    };
    f.render_widget(big_text, centered_area);

    // Per-class summary
    let header = Row::new(
        ["Class", "Value", "Invested", "All-Time PnL", "MTD", "YTD"]
            .into_iter()
            .map(|h| {
                Cell::from(h).style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            }),
    )
    .height(1)
    .bottom_margin(1);

    let class_rows = app.views.iter().map(|view| {
        Row::new(vec![
            Cell::from(view.class.title()),
            Cell::from(format_money(view.summary.total_value, &app.currency)),
            Cell::from(format_money(view.summary.invested, &app.currency)),
            Cell::from(format!(
                "{} ({:.2}%)",
                format_money(view.summary.pnl, &app.currency),
                view.summary.pnl_pct
            ))
            .style(Style::default().fg(pnl_color(view.summary.pnl))),
            pnl_cell(&view.mtd, &app.currency),
            pnl_cell(&view.ytd, &app.currency),
        ])
    });

    let bold_green = Style::default()
        .fg(Color::Green)
        .add_modifier(Modifier::BOLD);
    let total_row = Row::new(vec![
        Cell::from("TOTAL").style(bold_green),
        Cell::from(format_money(combined.summary.total_value, &app.currency)).style(bold_green),
        Cell::from(format_money(combined.summary.invested, &app.currency)),
        Cell::from(format!(
            "{} ({:.2}%)",
            format_money(combined.summary.pnl, &app.currency),
            combined.summary.pnl_pct
        ))
        .style(Style::default().fg(pnl_color(combined.summary.pnl))),
        pnl_cell(&combined.mtd, &app.currency),
        pnl_cell(&combined.ytd, &app.currency),
    ]);

    let table = Table::new(
        class_rows.chain(std::iter::once(total_row)),
        [
            Constraint::Percentage(12),
            Constraint::Percentage(18),
            Constraint::Percentage(16),
            Constraint::Percentage(22),
            Constraint::Percentage(16),
            Constraint::Percentage(16),
        ],
    )
    .header(header)
    .block(Block::default().borders(Borders::ALL).title("Summary"))
    .style(Style::default().fg(Color::White));
    f.render_widget(table, main_chunks[1]);

    render_class_allocation(f, main_chunks[2], app);

    let help_text = Paragraph::new(
        "Navigation: h/l (tabs) | 1-3 (direct) | j/k (select) | e (edit) | r (refresh) | q (quit)",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"))
    .style(Style::default().fg(Color::Gray))
    .alignment(Alignment::Center);
    f.render_widget(help_text, main_chunks[3]);
}

fn allocation_label(allocation: &[(&str, f64)]) -> String {
    allocation
        .iter()
        .map(|(label, pct)| format!("{label} {pct:.1}%"))
        .collect::<Vec<_>>()
        .join(" | ")
}

// Crypto share fills the bar, stocks take the rest
fn render_class_allocation(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default().borders(Borders::ALL).title("Allocation");
    let allocation = CombinedView::class_allocation(&app.views);
    if allocation.is_empty() {
        let empty = Paragraph::new("No allocations to display.")
            .block(block)
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center);
        f.render_widget(empty, area);
        return;
    }

    let crypto_share = allocation
        .iter()
        .find(|(label, _)| *label == AssetClass::Crypto.title())
        .map(|(_, pct)| pct / 100.0)
        .unwrap_or(0.0);
    let gauge = Gauge::default()
        .block(block)
        .gauge_style(Style::default().fg(Color::Yellow).bg(Color::Blue))
        .ratio(crypto_share.clamp(0.0, 1.0))
        .label(allocation_label(&allocation));
    f.render_widget(gauge, area);
}

fn render_class(f: &mut Frame, area: Rect, app: &App) {
    let Some(view) = app.current_view() else {
        render_loading(f, area);
        return;
    };

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    render_summary_line(f, main_chunks[0], view, &app.currency);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(main_chunks[1]);

    render_holdings(f, body[0], view, app);
    render_history_chart(f, body[1], view, &app.currency);

    if app.mode == AppMode::Edit {
        render_edit_dialog(f, view, app);
    }
}

fn render_summary_line(f: &mut Frame, area: Rect, view: &ClassView, currency: &str) {
    let summary = &view.summary;
    let lines = vec![
        Line::from(vec![
            Span::styled("Value: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_money(summary.total_value, currency),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled("   Invested: ", Style::default().fg(Color::Gray)),
            Span::raw(format_money(summary.invested, currency)),
            Span::styled("   PnL: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} ({:.2}%)", format_money(summary.pnl, currency), summary.pnl_pct),
                Style::default().fg(pnl_color(summary.pnl)),
            ),
        ]),
        Line::from(vec![
            Span::styled("MTD: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} ({:.2}%)", format_money(view.mtd.pnl, currency), view.mtd.pct),
                Style::default().fg(pnl_color(view.mtd.pnl)),
            ),
            Span::styled("   YTD: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} ({:.2}%)", format_money(view.ytd.pnl, currency), view.ytd.pct),
                Style::default().fg(pnl_color(view.ytd.pnl)),
            ),
            Span::styled(
                format!("   Rate: {}", view.settings.rate),
                Style::default().fg(Color::Gray),
            ),
        ]),
    ];

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("{} Summary", view.class.title())),
    );
    f.render_widget(paragraph, area);
}

fn render_holdings(f: &mut Frame, area: Rect, view: &ClassView, app: &App) {
    let header = Row::new(
        ["Asset", "Qty", "Price (USD)", "Value (USD)", "Value"]
            .into_iter()
            .map(|h| {
                Cell::from(h).style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )
            }),
    )
    .height(1)
    .bottom_margin(1);

    let rows = view.valuation.rows.iter().enumerate().map(|(i, row)| {
        // Highlight selected row
        let row_style = if i == app.selected_position {
            Style::default().bg(Color::DarkGray)
        } else {
            Style::default()
        };
        let price_color = if row.usd_price > 0.0 {
            Color::White
        } else {
            Color::Red
        };
        Row::new(vec![
            Cell::from(row.symbol.clone()),
            Cell::from(format_amount(row.quantity)),
            Cell::from(format!("{:.2}", row.usd_price)).style(Style::default().fg(price_color)),
            Cell::from(format_with_commas(row.value_usd)),
            Cell::from(format_money(row.value_local, &app.currency)),
        ])
        .height(1)
        .style(row_style)
    });

    let total_style = Style::default()
        .fg(Color::Green)
        .add_modifier(Modifier::BOLD);
    let total_row = Row::new(vec![
        Cell::from("TOTAL").style(total_style),
        Cell::from(""),
        Cell::from(""),
        Cell::from(format_with_commas(view.valuation.get_total_usd())).style(total_style),
        Cell::from(format_money(view.valuation.get_total_value(), &app.currency)).style(total_style),
    ]);

    let help_text = match app.mode {
        AppMode::Normal => "j/k (select) | e (edit) | r (refresh)",
        AppMode::Edit => "Edit Mode: Enter (save) | Esc (cancel)",
    };

    let table = Table::new(
        rows.chain(std::iter::once(total_row)),
        [
            Constraint::Percentage(14),
            Constraint::Percentage(18),
            Constraint::Percentage(20),
            Constraint::Percentage(20),
            Constraint::Percentage(28),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Holdings - {help_text}")),
    )
    .style(Style::default().fg(Color::White));

    f.render_widget(table, area);
}

fn render_history_chart(f: &mut Frame, area: Rect, view: &ClassView, currency: &str) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Portfolio Value Over Time");

    if view.history.len() < 2 {
        let placeholder = Paragraph::new("Portfolio history will appear here as data is collected.")
            .block(block)
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(placeholder, area);
        return;
    }

    let points: Vec<(f64, f64)> = view
        .history
        .iter()
        .map(|s| (s.timestamp.timestamp() as f64, s.value))
        .collect();
    let (x_min, x_max) = (points[0].0, points[points.len() - 1].0);
    let y_min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let y_max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let padding = ((y_max - y_min) * 0.1).max(1.0);

    let date_label = |secs: f64| {
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .map(|ts| ts.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    };

    let datasets = vec![Dataset::default()
        .name(currency.to_string())
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&points)];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max.max(x_min + 1.0)])
                .labels(vec![date_label(x_min), date_label(x_max)]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min - padding, y_max + padding])
                .labels(vec![
                    format_with_commas(y_min - padding),
                    format_with_commas(y_max + padding),
                ]),
        );
    f.render_widget(chart, area);
}

fn render_loading(f: &mut Frame, area: Rect) {
    let loading_text = Paragraph::new("Loading portfolio data...")
        .block(Block::default().borders(Borders::ALL).title("Loading"))
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);

    f.render_widget(loading_text, area);
}

fn render_edit_dialog(f: &mut Frame, view: &ClassView, app: &App) {
    let Some(row) = view.valuation.rows.get(app.selected_position) else {
        return;
    };

    let popup_area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, popup_area);

    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title section
            Constraint::Length(4), // Current value section
            Constraint::Length(4), // Input section
            Constraint::Length(3), // Instructions
        ])
        .margin(1)
        .split(popup_area);

    let main_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Edit Holding Quantity ")
        .title_alignment(Alignment::Center)
        .style(Style::default().bg(Color::Black));
    f.render_widget(main_block, popup_area);

    let info_paragraph = Paragraph::new(format!("Holding: {} ({})", row.symbol, view.class))
        .style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center);
    f.render_widget(info_paragraph, popup_layout[0]);

    let current_text = format!(
        "Current Quantity: {}\nCurrent Value: {}",
        format_amount(row.quantity),
        format_money(row.value_local, &app.currency)
    );
    let current_paragraph = Paragraph::new(current_text)
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Gray))
                .title(" Current "),
        );
    f.render_widget(current_paragraph, popup_layout[1]);

    let cursor = if app.flash_state { "█" } else { "▌" };
    let input_with_cursor = format!("{}{cursor}", app.edit_input);

    // Preview the new value at the current price
    let (preview_text, input_style) = if app.edit_input.is_empty() {
        (
            "Enter quantity...".to_string(),
            Style::default().fg(Color::Gray),
        )
    } else {
        match parse_quantity(&app.edit_input) {
            Ok(quantity) => (
                format!(
                    "New Value: {}",
                    format_money(quantity * row.usd_price * view.valuation.rate, &app.currency)
                ),
                Style::default().fg(Color::Green),
            ),
            Err(_) if app.edit_input.ends_with('.') => (
                "Enter decimal places...".to_string(),
                Style::default().fg(Color::Yellow),
            ),
            Err(e) => (e.to_string(), Style::default().fg(Color::Red)),
        }
    };

    let input_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(popup_layout[2]);

    let input_field = Paragraph::new(input_with_cursor)
        .style(
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" New Quantity "),
        );
    f.render_widget(input_field, input_chunks[0]);

    let preview_paragraph = Paragraph::new(preview_text)
        .style(input_style)
        .alignment(Alignment::Center);
    f.render_widget(preview_paragraph, input_chunks[1]);

    let instructions_paragraph = Paragraph::new("Enter: Save | Esc: Cancel | Type digits and a decimal point")
        .style(Style::default().fg(Color::Cyan))
        .alignment(Alignment::Center);
    f.render_widget(instructions_paragraph, popup_layout[3]);
}

fn render_error_popup(f: &mut Frame, error: &str) {
    let popup_area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, popup_area);

    let error_paragraph = Paragraph::new(format!("{error}\n\nPress any key"))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Error")
                .style(Style::default().fg(Color::Red)),
        )
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(error_paragraph, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
