//! Kubernetes resource quantity parsing and formatting
//!
//! CPU is handled in cores and memory in bytes. Reported memory values are
//! GiB so that declared `mem` bounds read naturally (`.25` == `256Mi`).

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

/// Decimal suffixes as powers of ten
const DECIMAL_SUFFIXES: &[(&str, i32)] = &[
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

pub const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Parse a quantity string (`300m`, `.25Gi`, `1e3`, `2`) into base units
pub fn parse_quantity(input: &str) -> Option<f64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| n * factor);
        }
    }

    // Decimal exponent (`1e3`, `5E-2`) takes precedence over the `E` suffix
    if let Some(n) = parse_exponent(s) {
        return Some(n);
    }

    for (suffix, exponent) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return parse_number(number).map(|n| scale(n, *exponent));
        }
    }

    parse_number(s)
}

fn parse_number(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-')) {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_exponent(s: &str) -> Option<f64> {
    let idx = s.find(['e', 'E'])?;
    let (mantissa, exponent) = (&s[..idx], &s[idx + 1..]);
    if exponent.is_empty() {
        return None;
    }
    let mantissa = parse_number(mantissa)?;
    let exponent: i32 = exponent.parse().ok()?;
    Some(scale(mantissa, exponent))
}

// Dividing keeps `300m` at exactly 0.3 instead of 0.30000000000000004
fn scale(n: f64, exponent: i32) -> f64 {
    if exponent < 0 {
        n / 10f64.powi(-exponent)
    } else {
        n * 10f64.powi(exponent)
    }
}

/// CPU quantity in cores
pub fn parse_cpu(input: &str) -> Option<f64> {
    parse_quantity(input)
}

/// Memory quantity in GiB
pub fn parse_memory_gib(input: &str) -> Option<f64> {
    parse_quantity(input).map(|bytes| bytes / BYTES_PER_GIB)
}

/// Format cores as a decimal quantity, rounded to millicore precision
pub fn format_cpu(cores: f64) -> String {
    let rounded = (cores * 1000.0).round() / 1000.0;
    rounded.to_string()
}

/// Format GiB as the largest exact binary-suffixed quantity, or plain bytes
pub fn format_memory_gib(gib: f64) -> String {
    let bytes = (gib * BYTES_PER_GIB).round() as u64;
    for (suffix, factor) in BINARY_SUFFIXES.iter().rev() {
        let factor = *factor as u64;
        if bytes >= factor && bytes % factor == 0 {
            return format!("{}{}", bytes / factor, suffix);
        }
    }
    bytes.to_string()
}

/// Render a number without a trailing `.0` for whole values
pub fn format_number(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_parse_cpu_forms() {
        assert!(approx(parse_cpu("300m").unwrap(), 0.3));
        assert!(approx(parse_cpu(".3").unwrap(), 0.3));
        assert!(approx(parse_cpu("2").unwrap(), 2.0));
        assert!(approx(parse_cpu("1.5").unwrap(), 1.5));
        assert!(approx(parse_cpu("100000u").unwrap(), 0.1));
    }

    #[test]
    fn test_parse_memory_forms() {
        assert!(approx(parse_memory_gib(".25Gi").unwrap(), 0.25));
        assert!(approx(parse_memory_gib("256Mi").unwrap(), 0.25));
        assert!(approx(parse_memory_gib("1073741824").unwrap(), 1.0));
        assert!(approx(parse_memory_gib("1Ti").unwrap(), 1024.0));
        assert!(approx(parse_quantity("1G").unwrap(), 1e9));
        assert!(approx(parse_quantity("1e3").unwrap(), 1000.0));
        assert!(approx(parse_quantity("2E").unwrap(), 2e18));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("abc"), None);
        assert_eq!(parse_quantity("12Xi"), None);
        assert_eq!(parse_quantity("Gi"), None);
    }

    #[test]
    fn test_format_cpu() {
        assert_eq!(format_cpu(0.2), "0.2");
        assert_eq!(format_cpu(1.0), "1");
        assert_eq!(format_cpu(0.1234), "0.123");
    }

    #[test]
    fn test_format_memory_uses_largest_exact_suffix() {
        assert_eq!(format_memory_gib(1.0), "1Gi");
        assert_eq!(format_memory_gib(0.125), "128Mi");
        assert_eq!(format_memory_gib(0.25), "256Mi");
        assert_eq!(format_memory_gib(1.5), "1536Mi");
        assert!(approx(parse_memory_gib(&format_memory_gib(0.3)).unwrap(), 0.3));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(0.5), "0.5");
    }
}
