/// Formats a price given in minor units (cents) as `"<euros>.<cents> Euro"`.
pub fn format_price(minor_units: i64) -> String {
    format!("{:.2} Euro", minor_units as f64 / 100.0)
}

/// Formats the price suffix used by the category tree, e.g. `" €2.50"`.
pub(crate) fn euro_suffix(minor_units: i64) -> String {
    format!(" €{:.2}", minor_units as f64 / 100.0)
}
