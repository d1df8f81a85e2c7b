use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const CONTRACT_ID: &str = "newsprint.layout_audit";
pub const CONTRACT_VERSION: &str = "1";

const AUDIT_REGISTRY_ID: &str = "newsprint.audit_registry.v1";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryDef {
    pub id: &'static str,
    pub name: &'static str,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditDef {
    pub id: &'static str,
    pub category: &'static str,
    pub weight: f64,
    pub severity: &'static str,
    pub stage: &'static str,
    pub scored: bool,
}

pub const CATEGORIES_V1: [CategoryDef; 3] = [
    CategoryDef {
        id: "layout-integrity",
        name: "Layout Integrity",
        weight: 50.0,
    },
    CategoryDef {
        id: "content-conservation",
        name: "Content Conservation",
        weight: 25.0,
    },
    CategoryDef {
        id: "footnote-integrity",
        name: "Footnote Integrity",
        weight: 25.0,
    },
];

pub const AUDITS_V1: [AuditDef; 6] = [
    AuditDef { id: "layout.overflow_none", category: "layout-integrity", weight: 30.0, severity: "critical", stage: "post-fit", scored: true },
    AuditDef { id: "layout.sections_nonempty", category: "layout-integrity", weight: 15.0, severity: "high", stage: "post-fit", scored: true },
    AuditDef { id: "layout.page_references_resolved", category: "layout-integrity", weight: 5.0, severity: "medium", stage: "post-fit", scored: true },
    AuditDef { id: "content.blocks_conserved", category: "content-conservation", weight: 25.0, severity: "critical", stage: "post-fit", scored: true },
    AuditDef { id: "footnotes.numbering_contiguous", category: "footnote-integrity", weight: 15.0, severity: "high", stage: "post-resolve", scored: true },
    AuditDef { id: "footnotes.dangling_refs_plain", category: "footnote-integrity", weight: 10.0, severity: "medium", stage: "post-resolve", scored: true },
];

// Kept in lockstep with the const tables above; the test module checks both.
const AUDIT_REGISTRY_V1_JSON: &str = r#"{
  "schema": "newsprint.audit_registry.v1",
  "categories": [
    { "id": "layout-integrity", "weight": 50.0 },
    { "id": "content-conservation", "weight": 25.0 },
    { "id": "footnote-integrity", "weight": 25.0 }
  ],
  "audits": [
    { "id": "layout.overflow_none", "category": "layout-integrity", "weight": 30.0, "severity": "critical" },
    { "id": "layout.sections_nonempty", "category": "layout-integrity", "weight": 15.0, "severity": "high" },
    { "id": "layout.page_references_resolved", "category": "layout-integrity", "weight": 5.0, "severity": "medium" },
    { "id": "content.blocks_conserved", "category": "content-conservation", "weight": 25.0, "severity": "critical" },
    { "id": "footnotes.numbering_contiguous", "category": "footnote-integrity", "weight": 15.0, "severity": "high" },
    { "id": "footnotes.dangling_refs_plain", "category": "footnote-integrity", "weight": 10.0, "severity": "medium" }
  ]
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verdict {
    NotApplicable,
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::NotApplicable => "not_applicable",
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Fail => "fail",
        }
    }

    fn credit(self) -> Option<f64> {
        match self {
            Verdict::Pass => Some(1.0),
            Verdict::Warn => Some(0.5),
            Verdict::Fail => Some(0.0),
            Verdict::NotApplicable => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditFinding {
    pub audit_id: String,
    pub verdict: Verdict,
    pub detail: String,
}

impl AuditFinding {
    pub fn new(audit_id: impl Into<String>, verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            audit_id: audit_id.into(),
            verdict,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditScore {
    pub score: f64,
    pub gate_passed: bool,
    pub category_scores: BTreeMap<&'static str, f64>,
}

pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

static AUDIT_REGISTRY_HASH: OnceLock<String> = OnceLock::new();
static CONTRACT_FINGERPRINT: OnceLock<String> = OnceLock::new();

pub fn audit_registry_v1_json() -> &'static str {
    AUDIT_REGISTRY_V1_JSON
}

pub fn audit_registry_v1_hash_sha256() -> String {
    AUDIT_REGISTRY_HASH
        .get_or_init(|| hex_sha256(AUDIT_REGISTRY_V1_JSON.as_bytes()))
        .clone()
}

pub fn contract_fingerprint_sha256() -> String {
    CONTRACT_FINGERPRINT
        .get_or_init(|| {
            let registry_hash = audit_registry_v1_hash_sha256();
            let parts: [&str; 4] = [
                CONTRACT_ID,
                CONTRACT_VERSION,
                AUDIT_REGISTRY_ID,
                registry_hash.as_str(),
            ];
            let mut payload = String::new();
            for part in parts {
                payload.push_str(part);
                payload.push('\n');
            }
            hex_sha256(payload.as_bytes())
        })
        .clone()
}

pub fn category_defs_v1() -> &'static [CategoryDef] {
    &CATEGORIES_V1
}

pub fn audit_defs_v1() -> &'static [AuditDef] {
    &AUDITS_V1
}

pub fn audit_def(audit_id: &str) -> Option<&'static AuditDef> {
    AUDITS_V1.iter().find(|d| d.id == audit_id)
}

pub fn default_gate_level(audit_id: &str) -> &'static str {
    match audit_id {
        "layout.page_references_resolved" => "warn",
        "layout.sections_nonempty" => "warn",
        _ => "error",
    }
}

pub fn profile_gate_override(profile: &str, audit_id: &str) -> Option<&'static str> {
    let p = profile.to_ascii_lowercase();
    match (p.as_str(), audit_id) {
        ("strict", "layout.sections_nonempty") => Some("error"),
        ("strict", "layout.page_references_resolved") => Some("error"),
        ("draft", "layout.overflow_none") => Some("warn"),
        _ => None,
    }
}

pub fn effective_gate_level(profile: &str, audit_id: &str) -> &'static str {
    profile_gate_override(profile, audit_id).unwrap_or_else(|| default_gate_level(audit_id))
}

pub fn worst_verdict(verdicts: impl IntoIterator<Item = Verdict>) -> Option<Verdict> {
    verdicts.into_iter().max()
}

/// Weighted score over the registry. Audits with no finding, or only
/// not-applicable findings, drop out of their category's denominator.
pub fn score(profile: &str, findings: &[AuditFinding]) -> AuditScore {
    let mut by_audit: BTreeMap<&str, Vec<Verdict>> = BTreeMap::new();
    for finding in findings {
        by_audit
            .entry(finding.audit_id.as_str())
            .or_default()
            .push(finding.verdict);
    }

    let mut gate_passed = true;
    let mut category_scores = BTreeMap::new();
    let mut weighted = 0.0;
    let mut weight_total = 0.0;
    for category in category_defs_v1() {
        let mut earned = 0.0;
        let mut possible = 0.0;
        for def in audit_defs_v1().iter().filter(|d| d.category == category.id) {
            let Some(verdict) = by_audit
                .get(def.id)
                .and_then(|v| worst_verdict(v.iter().copied()))
            else {
                continue;
            };
            if verdict == Verdict::Fail && effective_gate_level(profile, def.id) == "error" {
                gate_passed = false;
            }
            let Some(credit) = verdict.credit() else {
                continue;
            };
            if def.scored {
                earned += credit * def.weight;
                possible += def.weight;
            }
        }
        if possible > 0.0 {
            let ratio = earned / possible;
            category_scores.insert(category.id, ratio * 100.0);
            weighted += ratio * category.weight;
            weight_total += category.weight;
        }
    }

    let score = if weight_total > 0.0 {
        weighted / weight_total * 100.0
    } else {
        100.0
    };
    AuditScore {
        score,
        gate_passed,
        category_scores,
    }
}

pub fn report_json(profile: &str, findings: &[AuditFinding], layout_fingerprint: &str) -> Value {
    let scored = score(profile, findings);
    let entries: Vec<Value> = findings
        .iter()
        .map(|finding| {
            json!({
                "id": finding.audit_id,
                "verdict": finding.verdict.as_str(),
                "gate": effective_gate_level(profile, &finding.audit_id),
                "severity": audit_def(&finding.audit_id).map(|d| d.severity),
                "detail": finding.detail,
            })
        })
        .collect();
    json!({
        "contract_id": CONTRACT_ID,
        "contract_version": CONTRACT_VERSION,
        "contract_fingerprint_sha256": contract_fingerprint_sha256(),
        "profile": profile,
        "layout_fingerprint_sha256": layout_fingerprint,
        "score": (scored.score * 10.0).round() / 10.0,
        "gate_passed": scored.gate_passed,
        "categories": scored.category_scores,
        "findings": entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_embedded_registry() -> Value {
        serde_json::from_str(AUDIT_REGISTRY_V1_JSON).expect("embedded audit registry JSON should parse")
    }

    fn all_passing() -> Vec<AuditFinding> {
        audit_defs_v1()
            .iter()
            .map(|d| AuditFinding::new(d.id, Verdict::Pass, ""))
            .collect()
    }

    #[test]
    fn contract_fingerprint_is_stable_and_nonempty() {
        let a = contract_fingerprint_sha256();
        let b = contract_fingerprint_sha256();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn category_weights_sum_to_100() {
        let sum: f64 = category_defs_v1().iter().map(|c| c.weight).sum();
        assert!((sum - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn const_tables_match_embedded_registry() {
        let root = parse_embedded_registry();
        assert_eq!(
            root.get("schema").and_then(Value::as_str),
            Some(AUDIT_REGISTRY_ID)
        );
        let audits = root.get("audits").and_then(Value::as_array).expect("audits array");
        assert_eq!(audits.len(), audit_defs_v1().len());
        for (json_def, def) in audits.iter().zip(audit_defs_v1()) {
            assert_eq!(json_def.get("id").and_then(Value::as_str), Some(def.id));
            assert_eq!(json_def.get("category").and_then(Value::as_str), Some(def.category));
            assert_eq!(json_def.get("weight").and_then(Value::as_f64), Some(def.weight));
            assert_eq!(json_def.get("severity").and_then(Value::as_str), Some(def.severity));
        }
        for def in audit_defs_v1() {
            assert!(
                category_defs_v1().iter().any(|c| c.id == def.category),
                "audit {} points at unknown category",
                def.id
            );
        }
    }

    #[test]
    fn gate_levels_apply_profile_overrides() {
        assert_eq!(effective_gate_level("strict", "layout.sections_nonempty"), "error");
        assert_eq!(effective_gate_level("default", "layout.sections_nonempty"), "warn");
        assert_eq!(effective_gate_level("draft", "layout.overflow_none"), "warn");
        assert_eq!(effective_gate_level("draft", "content.blocks_conserved"), "error");
    }

    #[test]
    fn all_passing_findings_score_full_marks() {
        let scored = score("default", &all_passing());
        assert!((scored.score - 100.0).abs() < 1e-9);
        assert!(scored.gate_passed);
        assert_eq!(scored.category_scores.len(), 3);
    }

    #[test]
    fn critical_failure_closes_gate_and_lowers_score() {
        let mut findings = all_passing();
        findings.push(AuditFinding::new(
            "layout.overflow_none",
            Verdict::Fail,
            "slot front.right over by 12px",
        ));
        let scored = score("default", &findings);
        assert!(!scored.gate_passed);
        assert!(scored.score < 100.0);

        let draft = score("draft", &findings);
        assert!(draft.gate_passed, "draft profile downgrades overflow to warn");
    }

    #[test]
    fn not_applicable_audits_leave_denominator() {
        let findings = vec![
            AuditFinding::new("footnotes.numbering_contiguous", Verdict::NotApplicable, "no footnotes"),
            AuditFinding::new("footnotes.dangling_refs_plain", Verdict::NotApplicable, "no footnotes"),
            AuditFinding::new("layout.overflow_none", Verdict::Pass, ""),
        ];
        let scored = score("default", &findings);
        assert!(!scored.category_scores.contains_key("footnote-integrity"));
        assert!((scored.score - 100.0).abs() < 1e-9);
    }

    #[test]
    fn report_json_carries_fingerprints_and_findings() {
        let report = report_json("default", &all_passing(), "abc123");
        assert_eq!(report["contract_id"], CONTRACT_ID);
        assert_eq!(report["layout_fingerprint_sha256"], "abc123");
        assert_eq!(report["gate_passed"], true);
        assert_eq!(
            report["findings"].as_array().map(Vec::len),
            Some(audit_defs_v1().len())
        );
    }
}
