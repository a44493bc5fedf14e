use eyre::Context as _;

/// Parse a human decimal amount ("0.001") into integer base units, given the
/// asset's decimal count. All arithmetic is integer; floats never touch
/// monetary values.
pub fn parse_ui_to_base(s: &str, decimals: u32) -> eyre::Result<u128> {
    let s = s.trim();
    if s.is_empty() {
        eyre::bail!("empty amount");
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };

    if whole.starts_with('-') {
        eyre::bail!("amount must be non-negative");
    }

    let whole_v: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().context("parse whole part")?
    };

    if frac.len() > decimals as usize {
        eyre::bail!("too many decimal places for asset (decimals={decimals})");
    }

    let mut frac_s = frac.to_owned();
    while frac_s.len() < decimals as usize {
        frac_s.push('0');
    }
    let frac_v: u128 = if frac_s.is_empty() {
        0
    } else {
        frac_s.parse().context("parse fractional part")?
    };

    let scale = 10_u128
        .checked_pow(decimals)
        .ok_or_else(|| eyre::eyre!("decimals too large"))?;

    whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| eyre::eyre!("amount overflow"))
}

/// Format integer base units back into a decimal string, trimming trailing
/// zeros ("1500000" @ 6 decimals => "1.5").
pub fn format_base_to_ui(base: u128, decimals: u32) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(base.to_string());
    }
    let scale = 10_u128
        .checked_pow(decimals)
        .ok_or_else(|| eyre::eyre!("decimals too large"))?;
    let whole = base / scale;
    let frac = base % scale;
    if frac == 0 {
        return Ok(whole.to_string());
    }
    let mut frac_s = format!("{frac:0width$}", width = decimals as usize);
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    Ok(format!("{whole}.{frac_s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_whole_and_fractional() -> eyre::Result<()> {
        assert_eq!(parse_ui_to_base("1", 6)?, 1_000_000);
        assert_eq!(parse_ui_to_base("1.5", 6)?, 1_500_000);
        assert_eq!(parse_ui_to_base("0.001", 8)?, 100_000);
        assert_eq!(parse_ui_to_base("0.000001", 6)?, 1);
        assert_eq!(parse_ui_to_base("0", 18)?, 0);
        Ok(())
    }

    #[test]
    fn rejects_excess_precision_and_negatives() {
        assert!(parse_ui_to_base("1.0000001", 6).is_err());
        assert!(parse_ui_to_base("-1", 6).is_err());
        assert!(parse_ui_to_base("", 6).is_err());
    }

    #[test]
    fn format_trims_trailing_zeros() -> eyre::Result<()> {
        assert_eq!(format_base_to_ui(1_500_000, 6)?, "1.5");
        assert_eq!(format_base_to_ui(1, 6)?, "0.000001");
        assert_eq!(format_base_to_ui(10_000_000, 6)?, "10");
        assert_eq!(format_base_to_ui(100_000, 8)?, "0.001");
        Ok(())
    }
}
