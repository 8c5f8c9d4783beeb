//! Price-band helpers used by consumers of the resolved quote.

use crate::parse::parse_amount;

/// Upper bound of a price band: `"100-120"` -> 120, `"857.00 to 900.00"` -> 900.
///
/// `None` when the band is blank or its last figure does not parse to a
/// positive amount.
pub fn upper_price(price_band: &str) -> Option<f64> {
    let last = price_band
        .split('-')
        .flat_map(|part| part.split(" to "))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .last()?;
    let price = parse_amount(last);
    (price > 0.0).then_some(price)
}

/// Premium as a percentage of the band's upper price, rounded to 2 places.
///
/// A `0.0` quote reads as "no premium" here and yields `Some(0.0)`.
pub fn listing_gain_percent(quote: f64, price_band: Option<&str>) -> Option<f64> {
    let base = upper_price(price_band?)?;
    Some(((quote / base) * 100.0 * 100.0).round() / 100.0)
}
