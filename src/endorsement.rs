use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EndorsementId, OptionId, Sequence, format_cents};

/// Old/new pair for one changed field. Only `new` drives the fold; `old` is
/// what the author saw and is kept for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<u64>,
    pub new: Option<u64>,
}

impl FieldChange {
    pub fn to(old: u64, new: u64) -> Self {
        FieldChange { old: Some(old), new: Some(new) }
    }
}

/// Sparse patch over a coverage schedule. Keys are raw coverage codes from
/// the workflow layer; they are resolved against the catalog at fold time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageChange {
    #[serde(default)]
    pub aggregate_limit: Option<FieldChange>,
    #[serde(default)]
    pub aggregate_coverages: BTreeMap<String, FieldChange>,
    #[serde(default)]
    pub sublimit_coverages: BTreeMap<String, FieldChange>,
}

impl CoverageChange {
    pub fn is_empty(&self) -> bool {
        self.aggregate_limit.is_none()
            && self.aggregate_coverages.is_empty()
            && self.sublimit_coverages.is_empty()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        let arrow = |name: &str, change: &FieldChange| {
            let show = |v: Option<u64>| v.map(format_cents).unwrap_or_else(|| "none".to_string());
            format!("{name}: {} -> {}", show(change.old), show(change.new))
        };
        if let Some(change) = &self.aggregate_limit {
            parts.push(arrow("aggregate_limit", change));
        }
        for (code, change) in &self.aggregate_coverages {
            parts.push(arrow(code.as_str(), change));
        }
        for (code, change) in &self.sublimit_coverages {
            parts.push(arrow(format!("{code} sublimit").as_str(), change));
        }
        if parts.is_empty() {
            "Coverage change (no fields)".to_string()
        } else {
            format!("Coverage change - {}", parts.join("; "))
        }
    }
}

/// Closed set of endorsement types. The fold matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndorsementKind {
    CoverageChange(CoverageChange),
    Cancellation { reason: String },
    Extension { new_expiration: NaiveDate },
    NameChange { new_named_insured: String },
    AddressChange { new_address: String },
    /// Extended reporting period purchased after cancellation or expiry.
    Erp { reporting_period_end: NaiveDate },
    BorChange { new_broker: String },
    Reinstatement,
    Other { note: String },
}

impl EndorsementKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EndorsementKind::CoverageChange(_) => "coverage_change",
            EndorsementKind::Cancellation { .. } => "cancellation",
            EndorsementKind::Extension { .. } => "extension",
            EndorsementKind::NameChange { .. } => "name_change",
            EndorsementKind::AddressChange { .. } => "address_change",
            EndorsementKind::Erp { .. } => "erp",
            EndorsementKind::BorChange { .. } => "bor_change",
            EndorsementKind::Reinstatement => "reinstatement",
            EndorsementKind::Other { .. } => "other",
        }
    }

    /// Audit line used when the author gave no description.
    pub fn describe(&self) -> String {
        match self {
            EndorsementKind::CoverageChange(change) => change.describe(),
            EndorsementKind::Cancellation { reason } => format!("Cancellation - {reason}"),
            EndorsementKind::Extension { new_expiration } => {
                format!("Policy period extended to {new_expiration}")
            }
            EndorsementKind::NameChange { new_named_insured } => {
                format!("Named insured changed to {new_named_insured}")
            }
            EndorsementKind::AddressChange { new_address } => {
                format!("Mailing address changed to {new_address}")
            }
            EndorsementKind::Erp { reporting_period_end } => {
                format!("Extended reporting period through {reporting_period_end}")
            }
            EndorsementKind::BorChange { new_broker } => format!("Broker of record changed to {new_broker}"),
            EndorsementKind::Reinstatement => "Policy reinstated".to_string(),
            EndorsementKind::Other { note } => note.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndorsementStatus {
    Draft,
    Issued,
    Voided,
}

impl EndorsementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EndorsementStatus::Draft => "draft",
            EndorsementStatus::Issued => "issued",
            EndorsementStatus::Voided => "voided",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    pub id: EndorsementId,
    pub option_id: OptionId,
    pub kind: EndorsementKind,
    pub status: EndorsementStatus,
    pub effective_date: NaiveDate,
    /// `None` while a draft; fixed at issue.
    pub creation_sequence: Option<Sequence>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
}

impl Endorsement {
    pub fn is_issued(&self) -> bool {
        self.status == EndorsementStatus::Issued
    }

    pub fn audit_description(&self) -> String {
        self.description.clone().unwrap_or_else(|| self.kind.describe())
    }

    /// Fold order: effective date, then issuance sequence. Only meaningful
    /// for issued endorsements.
    pub fn fold_key(&self) -> (NaiveDate, Option<Sequence>) {
        (self.effective_date, self.creation_sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MILLION: u64 = 100_000_000;

    #[test]
    fn coverage_change_description_lists_fields() {
        let change = CoverageChange {
            aggregate_limit: Some(FieldChange::to(2 * MILLION, 3 * MILLION)),
            aggregate_coverages: BTreeMap::from([("epl".to_string(), FieldChange::to(MILLION, 3 * MILLION / 2))]),
            sublimit_coverages: BTreeMap::new(),
        };
        let text = EndorsementKind::CoverageChange(change).describe();
        assert_eq!(
            text,
            "Coverage change - aggregate_limit: 2,000,000 -> 3,000,000; epl: 1,000,000 -> 1,500,000"
        );
    }

    #[test]
    fn kind_serializes_with_type_tag() {
        let kind = EndorsementKind::NameChange { new_named_insured: "Acme Holdings".to_string() };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "name_change");
        assert_eq!(value["new_named_insured"], "Acme Holdings");

        let unit = serde_json::to_value(EndorsementKind::Reinstatement).unwrap();
        assert_eq!(unit["type"], "reinstatement");
    }

    #[test]
    fn coverage_change_deserializes_sparse_payload() {
        let json = r#"{"type":"coverage_change","aggregate_coverages":{"epl":{"old":100000000,"new":150000000}}}"#;
        let kind: EndorsementKind = serde_json::from_str(json).unwrap();
        let EndorsementKind::CoverageChange(change) = kind else {
            panic!("expected coverage_change");
        };
        assert!(change.aggregate_limit.is_none());
        assert_eq!(change.aggregate_coverages["epl"].new, Some(150_000_000));
        assert!(!change.is_empty());
    }

    #[test]
    fn type_names_match_serde_tags() {
        let kinds = [
            EndorsementKind::CoverageChange(CoverageChange::default()),
            EndorsementKind::Cancellation { reason: "non-payment".to_string() },
            EndorsementKind::Extension { new_expiration: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap() },
            EndorsementKind::NameChange { new_named_insured: "x".to_string() },
            EndorsementKind::AddressChange { new_address: "x".to_string() },
            EndorsementKind::Erp { reporting_period_end: NaiveDate::from_ymd_opt(2027, 1, 1).unwrap() },
            EndorsementKind::BorChange { new_broker: "x".to_string() },
            EndorsementKind::Reinstatement,
            EndorsementKind::Other { note: "x".to_string() },
        ];
        for kind in kinds {
            let value = serde_json::to_value(&kind).unwrap();
            assert_eq!(value["type"], kind.type_name());
        }
    }
}
