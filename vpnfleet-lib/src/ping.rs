//! Pure parsing of `ping`'s textual summary (§4.7, §9.5).

use std::sync::OnceLock;

use regex::Regex;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PingStats {
    pub packet_loss_pct: f64,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl PingStats {
    pub fn success(&self) -> bool {
        self.packet_loss_pct < 100.0
    }
}

fn loss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\d.]+)% packet loss").unwrap())
}

fn rtt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"= ([\d.]+)/([\d.]+)/([\d.]+)(?:/[\d.]+)? ms").unwrap())
}

pub fn parse_ping_output(text: &str) -> PingStats {
    let packet_loss_pct = loss_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(100.0);

    let mut stats = PingStats { packet_loss_pct, ..Default::default() };
    if let Some(c) = rtt_re().captures(text) {
        stats.min_ms = c.get(1).and_then(|m| m.as_str().parse().ok());
        stats.avg_ms = c.get(2).and_then(|m| m.as_str().parse().ok());
        stats.max_ms = c.get(3).and_then(|m| m.as_str().parse().ok());
    }
    stats
}
