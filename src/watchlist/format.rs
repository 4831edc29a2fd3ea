//! Display helpers for the rendering layer.

/// Stable per-symbol color so chart series keep their hue across renders.
pub fn color_for_symbol(symbol: &str) -> String {
    let mut hash: i32 = 0;
    for ch in symbol.chars() {
        hash = (ch as i32).wrapping_add((hash << 5).wrapping_sub(hash));
    }
    let hue = hash.rem_euclid(360);
    format!("hsl({hue}, 70%, 50%)")
}

pub fn format_price(price: f64) -> String {
    format!("${price:.2}")
}

pub fn format_change_percent(change_percent: f64) -> String {
    format!("{change_percent:+.2}%")
}
