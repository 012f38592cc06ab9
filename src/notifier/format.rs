//! Alert text rendering.

use crate::types::{BaseMarket, CandidatePick, MarketType, Period, PlayerStat};

/// Short display label for a provider sport key.
pub fn sport_label(sport: &str) -> String {
    let label = match sport {
        "basketball_nba" => "NBA",
        "basketball_euroleague" => "EuroLeague",
        "basketball_ncaab" => "NCAAB",
        "americanfootball_nfl" => "NFL",
        "americanfootball_ncaaf" => "NCAAF",
        "baseball_mlb" => "MLB",
        "icehockey_nhl" => "NHL",
        "soccer_epl" => "Premier League",
        "soccer_spain_la_liga" => "La Liga",
        "soccer_italy_serie_a" => "Serie A",
        "soccer_germany_bundesliga" => "Bundesliga",
        "soccer_france_ligue_one" => "Ligue 1",
        "soccer_uefa_champs_league" => "Champions League",
        "tennis_atp" => "ATP",
        "tennis_wta" => "WTA",
        other => {
            // basketball_wnba -> WNBA, soccer_usa_mls -> USA MLS
            return other
                .split_once('_')
                .map(|(_, rest)| rest.replace('_', " ").to_uppercase())
                .unwrap_or_else(|| other.to_uppercase());
        }
    };
    label.to_string()
}

fn period_label(period: Period) -> String {
    match period {
        Period::Quarter(n) => format!("{} quarter", ordinal(n)),
        Period::Half(n) => format!("{} half", ordinal(n)),
    }
}

fn ordinal(n: u8) -> String {
    match n {
        1 => "1st".to_string(),
        2 => "2nd".to_string(),
        3 => "3rd".to_string(),
        n => format!("{n}th"),
    }
}

fn stat_label(stat: PlayerStat) -> &'static str {
    match stat {
        PlayerStat::Points => "points",
        PlayerStat::Assists => "assists",
        PlayerStat::Rebounds => "rebounds",
        PlayerStat::Threes => "three-pointers",
        PlayerStat::Blocks => "blocks",
        PlayerStat::Steals => "steals",
    }
}

fn base_description(base: BaseMarket, selection: &str, point: Option<f64>) -> String {
    match (base, point) {
        (BaseMarket::Head2Head, _) => format!("Winner: {selection}"),
        (BaseMarket::Spread, Some(p)) => format!("Handicap: {selection} {p:+.1}"),
        (BaseMarket::Spread, None) => format!("Handicap: {selection}"),
        (BaseMarket::Total, Some(p)) => format!("Total: {selection} {p}"),
        (BaseMarket::Total, None) => format!("Total: {selection}"),
    }
}

/// Human description of the bet.
pub fn market_description(market: MarketType, selection: &str, point: Option<f64>) -> String {
    match market {
        MarketType::Head2Head => base_description(BaseMarket::Head2Head, selection, point),
        MarketType::Spread => base_description(BaseMarket::Spread, selection, point),
        MarketType::Total => base_description(BaseMarket::Total, selection, point),
        MarketType::PeriodVariant { base, period } => format!(
            "{} ({})",
            base_description(base, selection, point),
            period_label(period)
        ),
        MarketType::PlayerProp(stat) => match point {
            Some(p) => format!("Player {}: {selection} {p}", stat_label(stat)),
            None => format!("Player {}: {selection}", stat_label(stat)),
        },
    }
}

/// Render the alert body for one pick.
pub fn render_alert(pick: &CandidatePick) -> String {
    let implied = 100.0 / pick.odds;
    let lines = [
        format!("{} | {}", sport_label(&pick.sport), pick.event_name()),
        market_description(pick.market, &pick.selection, pick.point),
        format!("Odds: {:.2} @ {}", pick.odds, pick.bookmaker),
        format!(
            "Probability: {:.1}% (implied {:.1}%)",
            pick.probability * 100.0,
            implied
        ),
        format!("Value: {:+.1}%", pick.value * 100.0),
        format!("Starts: {}", pick.event_start.format("%Y-%m-%d %H:%M UTC")),
    ];
    lines.join("\n")
}
