use crate::analysis::{AssetDetail, DashboardSnapshot};
use crate::config::IndicatorConfig;
use crate::scoring::{MAX_SCORE, ScoredAsset};
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

/// Rows of the detail table, counted back from the latest candle.
const DETAIL_ROWS: usize = 12;

fn get_visibility_ratio(score: u8) -> f64 {
    (0.4 + 0.6 * (score as f64 / MAX_SCORE as f64)).max(0.4)
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S").to_string()
}

fn base_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().enumerate().map(|(i, h)| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if i < 2 {
                cell
            } else {
                cell.set_alignment(CellAlignment::Right)
            }
        }));
    table
}

fn asset_row(rank: usize, asset: &ScoredAsset) -> Vec<Cell> {
    let ratio = get_visibility_ratio(asset.score);
    let cyan_val = (255.0 * ratio) as u8;
    let green_val = (255.0 * ratio) as u8;

    vec![
        Cell::new(rank).fg(Color::DarkGrey),
        Cell::new(asset.asset_id.to_uppercase()).fg(Color::Rgb {
            r: 0,
            g: cyan_val,
            b: cyan_val,
        }),
        Cell::new(format!("{:.4}", asset.price)).set_alignment(CellAlignment::Right),
        Cell::new(format!("{:.2}", asset.rsi)).set_alignment(CellAlignment::Right),
        Cell::new(format!("{:.4}", asset.ema_short)).set_alignment(CellAlignment::Right),
        Cell::new(format!("{:.4}", asset.ema_long)).set_alignment(CellAlignment::Right),
        Cell::new(format!("{}/{}", asset.score, MAX_SCORE))
            .fg(Color::Rgb {
                r: 0,
                g: green_val,
                b: 0,
            })
            .set_alignment(CellAlignment::Right),
    ]
}

fn asset_table(assets: &[ScoredAsset], config: &IndicatorConfig) -> Table {
    let ema_short = format!("EMA{}", config.ema_short);
    let ema_long = format!("EMA{}", config.ema_long);
    let mut table = base_table(&[
        "Rank",
        "Asset",
        "Price",
        "RSI",
        ema_short.as_str(),
        ema_long.as_str(),
        "Score",
    ]);
    for (i, asset) in assets.iter().enumerate() {
        table.add_row(asset_row(i + 1, asset));
    }
    table
}

/// The maximal-signal board, or `None` when nothing qualifies.
pub fn bullish_table(snapshot: &DashboardSnapshot, config: &IndicatorConfig) -> Option<Table> {
    if snapshot.bullish.is_empty() {
        return None;
    }
    Some(asset_table(&snapshot.bullish, config))
}

/// Every asset that had enough history to score, highest score first.
pub fn score_board(snapshot: &DashboardSnapshot, config: &IndicatorConfig) -> Table {
    let mut assets = snapshot.scored.clone();
    assets.sort_by(|a, b| b.score.cmp(&a.score));
    asset_table(&assets, config)
}

pub fn render_snapshot(snapshot: &DashboardSnapshot, config: &IndicatorConfig) -> String {
    let mut out = format!(
        "(Data taken at {} UTC)\n\nAssets with the strongest bullish signal\n",
        format_timestamp(snapshot.taken_at)
    );
    match bullish_table(snapshot, config) {
        Some(table) => out.push_str(&table.to_string()),
        None => out.push_str("No asset has a maximal bullish signal right now."),
    }
    out.push_str(&format!(
        "\n\nScore board ({} of {} listed assets scored)\n{}",
        snapshot.scored.len(),
        snapshot.listing.len(),
        score_board(snapshot, config)
    ));
    if !snapshot.alerts.is_empty() {
        out.push_str("\n\nNotifications\n");
        for alert in &snapshot.alerts {
            out.push_str(&format!("  {alert}\n"));
        }
    }
    out
}

pub fn render_detail(detail: &AssetDetail, config: &IndicatorConfig) -> String {
    let signals = &detail.signals;
    let check = |hit: bool| if hit { "[x]" } else { "[ ]" };

    let mut out = format!(
        "{} - current price: ${:.4}\nRSI: {:.2}",
        detail.asset_id.to_uppercase(),
        detail.price,
        detail.indicators.rsi
    );
    if let Some(smoothed) = detail.smoothed_rsi {
        out.push_str(&format!(" (smoothed: {smoothed:.2})"));
    }
    out.push_str(&format!(
        "\n\nBullish signal breakdown\n  {} RSI < 30: oversold\n  {} EMA{} > EMA{}: uptrend\n  {} Price above EMA{}\n  Bullish score: {} / {}\n\n",
        check(signals.oversold),
        check(signals.trend_up),
        config.ema_short,
        config.ema_long,
        check(signals.above_short_ema),
        config.ema_short,
        detail.score(),
        MAX_SCORE,
    ));

    let ema_short = format!("EMA{}", config.ema_short);
    let ema_long = format!("EMA{}", config.ema_long);
    let mut table = base_table(&[
        "Time (UTC)",
        "Close",
        ema_short.as_str(),
        ema_long.as_str(),
        "RSI",
    ]);
    let points = detail.series.points();
    let start = points.len().saturating_sub(DETAIL_ROWS);
    for i in start..points.len() {
        let rsi = detail.rsi_history[i]
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(format_timestamp(points[i].timestamp)).fg(Color::DarkGrey),
            Cell::new(format!("{:.4}", points[i].close)),
            Cell::new(format!("{:.4}", detail.indicators.ema_short[i]))
                .fg(Color::Green)
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.4}", detail.indicators.ema_long[i]))
                .fg(Color::Red)
                .set_alignment(CellAlignment::Right),
            Cell::new(rsi)
                .fg(Color::Magenta)
                .set_alignment(CellAlignment::Right),
        ]);
    }
    out.push_str(&table.to_string());
    out
}
