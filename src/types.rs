use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndorsementId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

/// Per-option issuance order. Assigned when a draft is issued and used to
/// break ties between endorsements sharing an effective date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(pub u64);

/// Count of status changes (issue / void) applied to one option's ledger.
/// Callers echo the version they read back into `issue` so a stale view is
/// detected instead of silently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerVersion(pub u64);

impl LedgerVersion {
    pub fn next(self) -> Self {
        LedgerVersion(self.0 + 1)
    }
}

/// Risk tier 1–5 assigned per industry. Higher is riskier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HazardClass(pub u8);

impl HazardClass {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(HazardClass(value))
    }
}

impl fmt::Display for HazardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cents per whole currency unit. All money in the crate is integer cents.
pub const CENTS_PER_UNIT: i64 = 100;

/// Largest premium, in cents, the calculator will return. Every integer up to
/// here is exact in an f64.
pub const MAX_PREMIUM: u64 = 1 << 53;

/// Round a derived cent amount to a whole cent. Premium outputs are rounded
/// exactly once, here.
pub fn round_cents(amount: f64) -> u64 {
    if amount <= 0.0 { 0 } else { amount.round() as u64 }
}

/// Render cents as `1,234,567.89` for audit descriptions.
pub fn format_cents(cents: u64) -> String {
    let units = cents / CENTS_PER_UNIT as u64;
    let frac = cents % CENTS_PER_UNIT as u64;
    let digits = units.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if frac == 0 { grouped } else { format!("{grouped}.{frac:02}") }
}
