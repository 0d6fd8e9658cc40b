/// Share of the payout kept when a task is finished late.
pub const DEFAULT_PENALTY_RATE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenaltyPolicy {
    rate: f64,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        PenaltyPolicy { rate: DEFAULT_PENALTY_RATE }
    }
}

impl PenaltyPolicy {
    pub fn new(rate: f64) -> Self {
        PenaltyPolicy { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Displayed payout. Recompute on every render: overdue flips with time.
    pub fn apply(&self, base_amount: f64, is_overdue: bool) -> f64 {
        if is_overdue {
            base_amount * self.rate
        } else {
            base_amount
        }
    }
}

pub fn apply_penalty(base_amount: f64, is_overdue: bool) -> f64 {
    PenaltyPolicy::default().apply(base_amount, is_overdue)
}

/// Whole amount with space-grouped thousands and the rouble sign: `12 345 ₽`.
pub fn format_amount(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-{} ₽", grouped)
    } else {
        format!("{} ₽", grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_time_amount_is_unchanged() {
        assert_eq!(apply_penalty(100.0, false), 100.0);
        assert_eq!(apply_penalty(0.0, false), 0.0);
    }

    #[test]
    fn overdue_amount_loses_ten_percent() {
        assert!((apply_penalty(100.0, true) - 90.0).abs() < 1e-9);
        assert_eq!(apply_penalty(0.0, true), 0.0);
    }

    #[test]
    fn custom_rate() {
        let policy = PenaltyPolicy::new(0.5);
        assert_eq!(policy.apply(300.0, true), 150.0);
        assert_eq!(policy.apply(300.0, false), 300.0);
    }

    #[test]
    fn amounts_are_grouped_and_rounded() {
        assert_eq!(format_amount(0.0), "0 ₽");
        assert_eq!(format_amount(90.0), "90 ₽");
        assert_eq!(format_amount(1234.5), "1 235 ₽");
        assert_eq!(format_amount(1_000_000.0), "1 000 000 ₽");
        assert_eq!(format_amount(-4500.0), "-4 500 ₽");
    }
}
