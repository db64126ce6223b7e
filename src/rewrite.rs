//! Rewrites USD amounts in a chat message into JPY.

use crate::types::{Provenance, RateSample};
use regex::{Captures, Regex};
use std::sync::LazyLock;

// Largest yen value that still converts to an exact integer.
const MAX_YEN: f64 = 9_007_199_254_740_992.0;

const AMOUNT: &str = r"[0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?|[0-9]+(?:\.[0-9]+)?";

// CME window first so its amount is not taken by the plain dollar branch.
static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"CME窓\s*(?P<color>[赤黄])丸\s*(?P<cme>{a})(?:\s*ドル)?|(?P<suffix>{a})ドル|\$(?P<prefix>{a})",
        a = AMOUNT
    ))
    .expect("amount pattern compiles")
});

static AVG_PRICE_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("平均取得単価 {2,}").expect("spacing pattern compiles"));

pub fn needs_conversion(text: &str) -> bool {
    PATTERN.is_match(text)
}

/// Replace every dollar / CME-window amount with its yen value. The first
/// conversion carries the rate line. Returns `None` if nothing was converted.
pub fn rewrite(text: &str, rate: &RateSample) -> Option<String> {
    let cleaned = text.replace("@everyone", "");
    let cleaned = cleaned.trim();
    let mut first = true;
    let mut converted = false;

    let out = PATTERN.replace_all(cleaned, |caps: &Captures<'_>| {
        let whole = caps.get(0).map_or("", |m| m.as_str()).to_string();
        let (raw, cme_color) = if let Some(m) = caps.name("cme") {
            (m.as_str(), caps.name("color").map(|c| c.as_str()))
        } else if let Some(m) = caps.name("suffix").or_else(|| caps.name("prefix")) {
            (m.as_str(), None)
        } else {
            return whole;
        };
        let Ok(usd) = raw.replace(',', "").parse::<f64>() else {
            return whole;
        };
        let yen = (usd * rate.value()).floor();
        if !(yen.is_finite() && yen < MAX_YEN) {
            return whole;
        }
        let yen = format_thousands(yen as i64);
        let usd = format_amount(raw);
        let mut piece = match cme_color {
            Some(color) => format!("{}円\nCME窓 {}丸{}ドル", yen, color, usd),
            None => format!("{}円\n{}ドル", yen, usd),
        };
        if first {
            first = false;
            piece.push('\n');
            piece.push_str(&rate_note(rate));
        }
        converted = true;
        piece
    });

    if !converted {
        return None;
    }
    Some(AVG_PRICE_GAP.replace_all(&out, "平均取得単価　").into_owned())
}

fn rate_note(rate: &RateSample) -> String {
    let note = match rate.provenance() {
        Provenance::Default => "(予備レート使用)",
        Provenance::Live if !rate.is_stale() => {
            "レートは5分ごとに更新されますが、市場の最新レートと異なる場合があります。"
        }
        _ => "(キャッシュレート使用)",
    };
    format!("(レート: 1ドル = {:.2}円)\n{}", rate.value(), note)
}

fn format_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Regroup the integer part with commas and keep any decimals as written.
fn format_amount(raw: &str) -> String {
    let plain = raw.replace(',', "");
    let (int_part, frac) = match plain.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (plain.as_str(), None),
    };
    let int_fmt = int_part
        .parse::<i64>()
        .map(format_thousands)
        .unwrap_or_else(|_| int_part.to_string());
    match frac {
        Some(f) => format!("{}.{}", int_fmt, f),
        None => int_fmt,
    }
}
