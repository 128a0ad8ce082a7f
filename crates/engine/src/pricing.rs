//! Final price derivation and the price text formats the targets speak.

use pricesync_core::Target;
use pricesync_core::config::{MarkupSide, PricingConfig};

/// Round to 2 fraction digits, half away from zero, on the decimal value
/// rather than the binary one (`1.005` rounds to `1.01`).
pub fn round_price(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let micros = (value * 1_000_000.0).round() as i64;
    let cents = (micros.abs() + 5_000) / 10_000;
    let cents = if micros < 0 { -cents } else { cents };
    cents as f64 / 100.0
}

/// `round(base * (1 + markup/100), 2)`
pub fn compute_final_price(base_price: f64, markup_percent: f64) -> f64 {
    round_price(base_price * (1.0 + markup_percent / 100.0))
}

/// Price to write to `target`. Targets that re-apply the markup themselves
/// get the rounded base price.
pub fn price_for_target(
    pricing: &PricingConfig,
    target: Target,
    base_price: f64,
    markup_percent: f64,
) -> f64 {
    match pricing.markup_side(target) {
        MarkupSide::Engine => compute_final_price(base_price, markup_percent),
        MarkupSide::Target => round_price(base_price),
    }
}

/// Parse storefront price text such as `R$ 1.234,56` or `9.88`.
///
/// Everything but digits, `,` and `.` is dropped. When a comma is present it
/// is the decimal separator and dots are thousands separators.
pub fn parse_price_text(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if kept.is_empty() {
        return None;
    }
    let normalized = if kept.contains(',') {
        kept.replace('.', "").replace(',', ".")
    } else {
        kept
    };
    normalized.parse().ok()
}

/// `9.88` -> `"9,88"`
pub fn format_br(price: f64) -> String {
    format_plain(price).replace('.', ",")
}

/// `9.88` -> `"9.88"`
pub fn format_plain(price: f64) -> String {
    format!("{:.2}", round_price(price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricesync_core::config::MarkupAppliedBy;

    #[test]
    fn test_compute_reference_value() {
        assert_eq!(compute_final_price(7.43, 33.0), 9.88);
    }

    #[test]
    fn test_zero_markup_is_rounding() {
        for p in [0.0, 1.0, 5.59, 12.345, 99.999, 1.005] {
            assert_eq!(compute_final_price(p, 0.0), round_price(p));
        }
        assert_eq!(round_price(12.345), 12.35);
        assert_eq!(round_price(1.005), 1.01);
        assert_eq!(round_price(-1.005), -1.01);
    }

    #[test]
    fn test_monotonic() {
        let prices = [0.0, 0.5, 1.99, 5.59, 7.43, 10.0, 250.75];
        let markups = [0.0, 5.0, 12.5, 33.0, 100.0];
        for m in markups {
            for pair in prices.windows(2) {
                assert!(compute_final_price(pair[0], m) <= compute_final_price(pair[1], m));
            }
        }
        for p in prices {
            for pair in markups.windows(2) {
                assert!(compute_final_price(p, pair[0]) <= compute_final_price(p, pair[1]));
            }
        }
    }

    #[test]
    fn test_pure() {
        let a = compute_final_price(5.59, 17.0);
        let b = compute_final_price(5.59, 17.0);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_price_for_target_policy() {
        let pricing = PricingConfig {
            markup_applied_by: MarkupAppliedBy {
                erp: MarkupSide::Target,
                ..Default::default()
            },
        };
        assert_eq!(price_for_target(&pricing, Target::Erp, 7.43, 33.0), 7.43);
        assert_eq!(price_for_target(&pricing, Target::Portal, 7.43, 33.0), 9.88);
    }

    #[test]
    fn test_parse_price_text() {
        assert_eq!(parse_price_text("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_price_text("R$ 5,59 /un"), Some(5.59));
        assert_eq!(parse_price_text("9.88"), Some(9.88));
        assert_eq!(parse_price_text("Indisponível"), None);
        assert_eq!(parse_price_text(""), None);
        assert_eq!(parse_price_text("1,2,3"), None);
    }

    #[test]
    fn test_formats() {
        assert_eq!(format_br(9.88), "9,88");
        assert_eq!(format_br(10.0), "10,00");
        assert_eq!(format_plain(1234.5), "1234.50");
    }
}
