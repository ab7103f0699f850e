pub mod time;

/// Convert price from ticks to human-readable format
pub fn format_price(price_ticks: u64, tick_size: f64) -> String {
    format!("${:.2}", price_ticks as f64 * tick_size)
}

/// Convert human price to ticks
pub fn price_to_ticks(price: f64, tick_size: f64) -> u64 {
    (price / tick_size).round() as u64
}
