use anyhow::Result;
use chrono::DateTime;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    symbols,
    text::Line,
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, Paragraph, Row, Table, Wrap,
    },
};
use std::io;
use std::time::Duration;
use tracing::info;

use crate::analysis::{self, AssetDetail, DashboardSnapshot};
use crate::coingecko::MarketFeed;
use crate::config::AppConfig;
use crate::report::Session;
use crate::scoring::{MAX_SCORE, OVERBOUGHT_RSI, OVERSOLD_RSI};
use crate::table_view::format_timestamp;
use crate::telegram::Notifier;

const MAX_MESSAGES: usize = 8;

// --- App State ---

/// Work queued by a key press. It runs after the next frame is drawn, so the
/// "please wait" popup is visible while the request is in flight.
#[derive(Debug, Clone, PartialEq)]
enum Job {
    Refresh,
    Inspect(String),
}

struct App {
    snapshot: Option<DashboardSnapshot>,
    detail: Option<AssetDetail>,
    detail_error: Option<String>,
    selected_index: usize,
    pending: Option<Job>,
    messages: Vec<String>,
}

impl App {
    fn new(alerts_enabled: bool) -> Self {
        let mut app = Self {
            snapshot: None,
            detail: None,
            detail_error: None,
            selected_index: 0,
            pending: Some(Job::Refresh),
            messages: Vec::new(),
        };
        if !alerts_enabled {
            app.push_message(
                "Set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID to enable automatic alerts.".to_string(),
            );
        }
        app
    }

    fn push_message(&mut self, message: String) {
        if self.messages.len() == MAX_MESSAGES {
            self.messages.remove(0);
        }
        self.messages.push(message);
    }

    fn listing_len(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.listing.len())
    }

    fn selected_asset_id(&self) -> Option<&str> {
        self.snapshot
            .as_ref()?
            .listing
            .get(self.selected_index)
            .map(|a| a.id.as_str())
    }

    fn is_bullish(&self, asset_id: &str) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.bullish.iter().any(|b| b.asset_id == asset_id))
    }

    fn set_snapshot(&mut self, snapshot: DashboardSnapshot) {
        for alert in &snapshot.alerts {
            self.push_message(alert.to_string());
        }
        if snapshot.listing.is_empty() {
            self.push_message("Asset list unavailable, the price API did not answer.".to_string());
        }
        self.selected_index = self.selected_index.min(snapshot.listing.len().saturating_sub(1));
        self.snapshot = Some(snapshot);
    }

    fn set_detail(&mut self, result: Result<AssetDetail>) {
        match result {
            Ok(detail) => {
                self.detail = Some(detail);
                self.detail_error = None;
            }
            Err(e) => {
                self.detail = None;
                self.detail_error = Some(format!("{e:#}"));
            }
        }
    }

    async fn run_job(
        &mut self,
        job: Job,
        feed: &dyn MarketFeed,
        notifier: Option<&dyn Notifier>,
        session: &mut Session,
        config: &AppConfig,
    ) {
        match job {
            Job::Refresh => {
                if let Some(notifier) = notifier {
                    if let Some(outcome) = session.announce(notifier).await {
                        self.push_message(outcome.to_string());
                    }
                }
                let snapshot = analysis::run_pass(feed, notifier, session, config).await;
                self.set_snapshot(snapshot);
                if let Some(id) = self.selected_asset_id().map(str::to_string) {
                    self.pending = Some(Job::Inspect(id));
                }
            }
            Job::Inspect(asset_id) => {
                let result = analysis::inspect_asset(feed, &asset_id, &config.indicators).await;
                self.set_detail(result);
            }
        }
    }
}

// --- TUI ---

/// Runs the interactive dashboard. The alert session lives exactly as long as this call.
pub async fn run_tui(
    feed: &dyn MarketFeed,
    notifier: Option<&dyn Notifier>,
    config: &AppConfig,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, feed, notifier, config).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    feed: &dyn MarketFeed,
    notifier: Option<&dyn Notifier>,
    config: &AppConfig,
) -> Result<()> {
    let mut session = Session::new();
    let mut app = App::new(notifier.is_some());

    loop {
        terminal.draw(|f| ui(f, &app, config))?;

        if let Some(job) = app.pending.take() {
            app.run_job(job, feed, notifier, &mut session, config).await;
            continue;
        }

        if event::poll(Duration::from_millis(100))? {
            // Resize events need no handling: the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !handle_key_event(key, &mut app) {
                    info!(alerts_sent = session.notified_count(), "session closed");
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
fn handle_key_event(key: KeyEvent, app: &mut App) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::F(5) | KeyCode::Char('r') if app.pending.is_none() => {
            app.pending = Some(Job::Refresh);
        }
        KeyCode::Enter if app.pending.is_none() => {
            if let Some(id) = app.selected_asset_id().map(str::to_string) {
                app.pending = Some(Job::Inspect(id));
            }
        }
        KeyCode::Up => {
            let len = app.listing_len();
            if len > 0 {
                app.selected_index = app.selected_index.checked_sub(1).unwrap_or(len - 1);
            }
        }
        KeyCode::Down => {
            let len = app.listing_len();
            if len > 0 {
                app.selected_index = (app.selected_index + 1) % len;
            }
        }
        _ => {}
    }
    true
}

fn ui(f: &mut Frame, app: &App, config: &AppConfig) {
    let main_layout = Layout::horizontal([Constraint::Percentage(20), Constraint::Percentage(80)])
        .split(f.size());

    render_sidebar(f, app, main_layout[0]);

    let right_chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Percentage(40),
        Constraint::Percentage(22),
        Constraint::Min(8),
    ])
    .split(main_layout[1]);

    render_header(f, app, right_chunks[0]);
    render_price_chart(f, app, config, right_chunks[1]);
    render_rsi_chart(f, app, right_chunks[2]);

    let bottom_chunks =
        Layout::horizontal([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(right_chunks[3]);
    render_signals(f, app, config, bottom_chunks[0]);
    render_bullish_table(f, app, config, bottom_chunks[1]);

    if let Some(job) = &app.pending {
        let (title, text) = match job {
            Job::Refresh => ("Refreshing", "Running analysis pass...\nPlease wait.".to_string()),
            Job::Inspect(id) => ("Loading", format!("Fetching {}...", id.to_uppercase())),
        };
        let area = centered_rect(60, 20, main_layout[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(text)
                .block(Block::default().title(title).borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn render_sidebar(f: &mut Frame, app: &App, area: Rect) {
    let sidebar_block = Block::default()
        .borders(Borders::ALL)
        .title("Assets")
        .title_alignment(Alignment::Center);
    let inner_sidebar_area = sidebar_block.inner(area);
    f.render_widget(sidebar_block, area);

    let sidebar_chunks = Layout::vertical([
        Constraint::Min(1),    // asset list
        Constraint::Length(2), // key help
    ])
    .split(inner_sidebar_area);

    let asset_lines: Vec<Line> = app
        .snapshot
        .as_ref()
        .map(|s| s.listing.as_slice())
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let marker = if app.is_bullish(&asset.id) { "▲" } else { " " };
            let mut line = Line::from(format!("{marker} {:>2}. {}", i + 1, asset.id));
            if i == app.selected_index {
                line = line.style(Style::default().fg(Color::Yellow).bg(Color::DarkGray));
            }
            line
        })
        .collect();

    let visible = sidebar_chunks[0].height.max(1) as usize;
    let offset = app.selected_index.saturating_sub(visible - 1) as u16;
    f.render_widget(Paragraph::new(asset_lines).scroll((offset, 0)), sidebar_chunks[0]);

    f.render_widget(
        Paragraph::new("↑↓ select · Enter inspect\nF5 refresh · q quit")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray)),
        sidebar_chunks[1],
    );
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let time_str = app
        .snapshot
        .as_ref()
        .map(|s| format_timestamp(s.taken_at))
        .unwrap_or_else(|| "Never".to_string());

    let line = match (&app.detail, &app.detail_error) {
        (_, Some(error)) => Line::from(error.clone()).style(Style::default().fg(Color::Red)),
        (Some(detail), None) => Line::from(vec![
            Span::styled(
                detail.asset_id.to_uppercase(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(
                "  Current price: ${:.4}  RSI: {:.2}  Score: {}/{}",
                detail.price,
                detail.indicators.rsi,
                detail.score(),
                MAX_SCORE
            )),
        ]),
        (None, None) => Line::from("Select an asset and press Enter"),
    };

    f.render_widget(
        Paragraph::new(line).block(
            Block::default()
                .borders(Borders::ALL)
                .title_alignment(Alignment::Center)
                .title(format!("Last Updated: {} UTC", time_str)),
        ),
        area,
    );
}

fn render_price_chart(f: &mut Frame, app: &App, config: &AppConfig, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Price and EMA");
    let Some(detail) = &app.detail else {
        f.render_widget(Paragraph::new("No price data").block(block), area);
        return;
    };

    let xs = chart_x(detail);
    let close: Vec<(f64, f64)> = xs.iter().copied().zip(detail.series.closes()).collect();
    let short: Vec<(f64, f64)> = xs
        .iter()
        .copied()
        .zip(detail.indicators.ema_short.iter().copied())
        .collect();
    let long: Vec<(f64, f64)> = xs
        .iter()
        .copied()
        .zip(detail.indicators.ema_long.iter().copied())
        .collect();

    let [x_min, x_max] = x_bounds(&xs);
    let [y_min, y_max] = y_bounds(&[close.as_slice(), short.as_slice(), long.as_slice()]);

    let datasets = vec![
        line_dataset("Close".to_string(), Color::Blue, &close),
        line_dataset(format!("EMA{}", config.indicators.ema_short), Color::Green, &short),
        line_dataset(format!("EMA{}", config.indicators.ema_long), Color::Red, &long),
    ];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([x_min, x_max])
                .labels(time_labels(x_min, x_max)),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels(vec![
                    Span::raw(format!("{y_min:.2}")),
                    Span::raw(format!("{:.2}", (y_min + y_max) / 2.0)),
                    Span::raw(format!("{y_max:.2}")),
                ]),
        );
    f.render_widget(chart, area);
}

fn render_rsi_chart(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("RSI");
    let Some(detail) = &app.detail else {
        f.render_widget(block, area);
        return;
    };

    let xs = chart_x(detail);
    let rsi: Vec<(f64, f64)> = xs
        .iter()
        .zip(&detail.rsi_history)
        .filter_map(|(&x, value)| value.map(|v| (x, v)))
        .collect();
    let [x_min, x_max] = x_bounds(&xs);
    let overbought = [(x_min, OVERBOUGHT_RSI), (x_max, OVERBOUGHT_RSI)];
    let oversold = [(x_min, OVERSOLD_RSI), (x_max, OVERSOLD_RSI)];

    let datasets = vec![
        line_dataset("RSI".to_string(), Color::Magenta, &rsi),
        line_dataset(format!("{OVERBOUGHT_RSI}"), Color::Red, &overbought),
        line_dataset(format!("{OVERSOLD_RSI}"), Color::Green, &oversold),
    ];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(Axis::default().bounds([x_min, x_max]))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, 100.0])
                .labels(vec![Span::raw("0"), Span::raw("50"), Span::raw("100")]),
        );
    f.render_widget(chart, area);
}

fn render_signals(f: &mut Frame, app: &App, config: &AppConfig, area: Rect) {
    let mut lines: Vec<Line> = Vec::new();

    if let Some(detail) = &app.detail {
        let signals = &detail.signals;
        let ind = &config.indicators;
        let checks = [
            (signals.oversold, format!("RSI < {OVERSOLD_RSI}: oversold")),
            (
                signals.trend_up,
                format!("EMA{} > EMA{}: uptrend", ind.ema_short, ind.ema_long),
            ),
            (signals.above_short_ema, format!("Price above EMA{}", ind.ema_short)),
        ];
        for (hit, label) in checks {
            let (mark, color) = if hit {
                ("✔", Color::Green)
            } else {
                ("✘", Color::DarkGray)
            };
            lines.push(Line::from(format!("{mark} {label}")).style(Style::default().fg(color)));
        }
        lines.push(
            Line::from(format!("Bullish score: {} / {}", detail.score(), MAX_SCORE))
                .style(Style::default().add_modifier(Modifier::BOLD)),
        );
        if let Some(smoothed) = detail.smoothed_rsi {
            lines.push(
                Line::from(format!("Smoothed RSI (reference): {smoothed:.2}"))
                    .style(Style::default().fg(Color::DarkGray)),
            );
        }
        lines.push(Line::from(""));
    }

    for message in app.messages.iter().rev() {
        lines.push(Line::from(message.clone()).style(Style::default().fg(Color::Gray)));
    }

    f.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(Block::default().borders(Borders::ALL).title("Signal Breakdown")),
        area,
    );
}

fn render_bullish_table(f: &mut Frame, app: &App, config: &AppConfig, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Strongest Bullish Signals");
    let bullish = app
        .snapshot
        .as_ref()
        .map(|s| s.bullish.as_slice())
        .unwrap_or_default();

    if bullish.is_empty() {
        f.render_widget(
            Paragraph::new("No asset has a maximal bullish signal right now.").block(block),
            area,
        );
        return;
    }

    let header = Row::new([
        Cell::from("#"),
        Cell::from("Asset"),
        Cell::from("Price"),
        Cell::from("RSI"),
        Cell::from(format!("EMA{}", config.indicators.ema_short)),
        Cell::from(format!("EMA{}", config.indicators.ema_long)),
        Cell::from("Score"),
    ])
    .style(Style::default().bg(Color::DarkGray));

    let rows = bullish.iter().enumerate().map(|(i, asset)| {
        Row::new([
            Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
            Cell::from(asset.asset_id.to_uppercase()).style(Style::default().fg(Color::Cyan)),
            Cell::from(format!("{:.4}", asset.price)),
            Cell::from(format!("{:.2}", asset.rsi)),
            Cell::from(format!("{:.4}", asset.ema_short)),
            Cell::from(format!("{:.4}", asset.ema_long)),
            Cell::from(format!("{}/{}", asset.score, MAX_SCORE))
                .style(Style::default().fg(Color::Green)),
        ])
        .height(1)
    });

    f.render_widget(
        Table::new(
            rows,
            [
                Constraint::Length(3),
                Constraint::Percentage(22),
                Constraint::Percentage(16),
                Constraint::Percentage(10),
                Constraint::Percentage(16),
                Constraint::Percentage(16),
                Constraint::Length(6),
            ],
        )
        .header(header)
        .block(block),
        area,
    );
}

// --- Chart helpers ---

fn line_dataset<'a>(name: String, color: Color, data: &'a [(f64, f64)]) -> Dataset<'a> {
    Dataset::default()
        .name(name)
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

/// Candle times in seconds, the x coordinate of every chart.
fn chart_x(detail: &AssetDetail) -> Vec<f64> {
    detail
        .series
        .points()
        .iter()
        .map(|p| p.timestamp.timestamp() as f64)
        .collect()
}

fn x_bounds(xs: &[f64]) -> [f64; 2] {
    match (xs.first(), xs.last()) {
        (Some(&first), Some(&last)) if last > first => [first, last],
        (Some(&only), _) => [only - 1.0, only + 1.0],
        _ => [0.0, 1.0],
    }
}

fn y_bounds(series: &[&[(f64, f64)]]) -> [f64; 2] {
    let (min, max) = series
        .iter()
        .flat_map(|s| s.iter().map(|&(_, y)| y))
        .filter(|y| y.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if !min.is_finite() || !max.is_finite() {
        return [0.0, 1.0];
    }
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
    [min - pad, max + pad]
}

fn time_labels(x_min: f64, x_max: f64) -> Vec<Span<'static>> {
    [x_min, (x_min + x_max) / 2.0, x_max]
        .into_iter()
        .map(|secs| {
            let label = DateTime::from_timestamp(secs as i64, 0)
                .map(|dt| dt.format("%d-%m %H:%M").to_string())
                .unwrap_or_default();
            Span::raw(label)
        })
        .collect()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coingecko::AssetSummary;
    use chrono::Utc;
    use crossterm::event::KeyModifiers;

    fn listing_snapshot(ids: &[&str]) -> DashboardSnapshot {
        DashboardSnapshot {
            taken_at: Utc::now(),
            listing: ids
                .iter()
                .map(|id| AssetSummary {
                    id: id.to_string(),
                    symbol: String::new(),
                    name: String::new(),
                    current_price: None,
                    market_cap_rank: None,
                })
                .collect(),
            scored: Vec::new(),
            bullish: Vec::new(),
            alerts: Vec::new(),
        }
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn selection_wraps_around() {
        let mut app = App::new(true);
        app.pending = None;
        app.set_snapshot(listing_snapshot(&["bitcoin", "ethereum", "solana"]));

        assert!(handle_key_event(press(KeyCode::Up), &mut app));
        assert_eq!(app.selected_asset_id(), Some("solana"));
        assert!(handle_key_event(press(KeyCode::Down), &mut app));
        assert_eq!(app.selected_asset_id(), Some("bitcoin"));
    }

    #[test]
    fn enter_queues_inspection_and_q_quits() {
        let mut app = App::new(true);
        app.pending = None;
        app.set_snapshot(listing_snapshot(&["bitcoin", "ethereum"]));

        handle_key_event(press(KeyCode::Down), &mut app);
        handle_key_event(press(KeyCode::Enter), &mut app);
        assert_eq!(app.pending, Some(Job::Inspect("ethereum".to_string())));

        // Busy: a second request is ignored.
        handle_key_event(press(KeyCode::F(5)), &mut app);
        assert_eq!(app.pending, Some(Job::Inspect("ethereum".to_string())));

        assert!(!handle_key_event(press(KeyCode::Char('q')), &mut app));
    }

    #[test]
    fn missing_credentials_leave_a_hint() {
        let app = App::new(false);
        assert_eq!(app.pending, Some(Job::Refresh));
        assert!(app.messages[0].contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn empty_listing_is_reported() {
        let mut app = App::new(true);
        app.set_snapshot(listing_snapshot(&[]));
        assert!(app.selected_asset_id().is_none());
        assert!(app.messages.iter().any(|m| m.contains("Asset list unavailable")));
    }

    #[test]
    fn bounds_handle_degenerate_input() {
        assert_eq!(x_bounds(&[]), [0.0, 1.0]);
        assert_eq!(x_bounds(&[5.0]), [4.0, 6.0]);
        let flat = [(0.0, 2.0), (1.0, 2.0)];
        assert_eq!(y_bounds(&[&flat[..]]), [1.0, 3.0]);
        assert_eq!(y_bounds(&[]), [0.0, 1.0]);
    }
}
