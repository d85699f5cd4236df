//! Notification-requirement decision for one assignment.
//!
//! The decision is keyword based:
//!
//! 1. mobile-only and a "Mobile Arbeit" entry exists: not required if the
//!    text says "keine Meldepflicht" / "nicht meldepflichtig", otherwise
//!    required
//! 2. a non-empty "Meldepflichtige Entsendetätigkeit" entry exists: required
//! 3. otherwise: not required

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::models::{CountryData, Matrix};
use crate::store::MatrixStore;

/// Category describing purely mobile work.
pub const MOBILE_WORK_CATEGORY: &str = "Mobile Arbeit";

/// Category describing the posted activity that must be notified.
pub const POSTED_ACTIVITY_CATEGORY: &str = "Meldepflichtige Entsendetätigkeit";

const MS_PER_DAY: i64 = 86_400_000;

static NO_NOTIFICATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)keine\s+meldepflicht|nicht\s+meldepflichtig").expect("static regex")
});

const EXPLAIN_MOBILE_EXEMPT: &str =
    "Laut Matrix besteht für reine mobile Arbeit keine Meldepflicht (siehe Abschnitt \"Mobile Arbeit\").";
const EXPLAIN_MOBILE_SPECIAL: &str =
    "Die Matrix enthält besondere Regelungen für mobile Arbeit; konservativ wird eine Meldepflicht angenommen.";
const EXPLAIN_POSTED_ACTIVITY: &str =
    "Für die im Land hinterlegte Entsendetätigkeit besteht grundsätzlich eine Meldepflicht (siehe Abschnitt \"Meldepflichtige Entsendetätigkeit\").";
const EXPLAIN_NONE: &str =
    "In der Matrix ist keine meldepflichtige Entsendetätigkeit hinterlegt; daher wird keine Meldepflicht angenommen.";

/// An assignment to evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub country_key: String,
    pub type_of_activity: String,
    pub traveller_role: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub is_mobile_only: bool,
}

/// Verdict plus the country's full matrix slice.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub country_key: String,
    pub type_of_activity: String,
    pub traveller_role: String,
    pub start_date: String,
    pub end_date: String,
    pub duration_days: Option<i64>,
    pub is_mobile_only: bool,
    pub requires_notification: bool,
    pub rule_explanation: String,
    pub details: CountryData,
}

/// Evaluate against the store's current matrix.
pub fn evaluate_current(store: &MatrixStore, request: EvaluationRequest) -> Result<Decision, EvaluationError> {
    let matrix = store.get()?;
    evaluate(&matrix, request)
}

/// Evaluate `request` against `matrix`.
///
/// A country declared in the header but without any data is evaluated
/// with an empty slice; a key the matrix does not know is rejected.
pub fn evaluate(matrix: &Matrix, request: EvaluationRequest) -> Result<Decision, EvaluationError> {
    let details = match matrix.country_data(&request.country_key) {
        Some(data) => data.clone(),
        None if matrix.has_country(&request.country_key) => CountryData::new(),
        None => return Err(EvaluationError::UnknownCountry(request.country_key)),
    };

    let duration_days = duration_days(&request.start_date, &request.end_date);
    let (requires_notification, rule_explanation) = decide(&details, request.is_mobile_only);

    Ok(Decision {
        country_key: request.country_key,
        type_of_activity: request.type_of_activity,
        traveller_role: request.traveller_role,
        start_date: request.start_date,
        end_date: request.end_date,
        duration_days,
        is_mobile_only: request.is_mobile_only,
        requires_notification,
        rule_explanation: rule_explanation.to_string(),
        details,
    })
}

fn decide(data: &CountryData, is_mobile_only: bool) -> (bool, &'static str) {
    if is_mobile_only {
        if let Some(mobile) = data.get(MOBILE_WORK_CATEGORY) {
            return if NO_NOTIFICATION.is_match(&mobile.combined_text()) {
                (false, EXPLAIN_MOBILE_EXEMPT)
            } else {
                (true, EXPLAIN_MOBILE_SPECIAL)
            };
        }
    }

    let posted = data
        .get(POSTED_ACTIVITY_CATEGORY)
        .map(|e| e.combined_text())
        .unwrap_or_default();
    if !posted.trim().is_empty() {
        return (true, EXPLAIN_POSTED_ACTIVITY);
    }

    (false, EXPLAIN_NONE)
}

/// Inclusive day count, `None` if either date does not parse.
pub fn duration_days(start: &str, end: &str) -> Option<i64> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    let ms = (end - start).num_milliseconds();
    Some(ms.div_euclid(MS_PER_DAY) + 1)
}

/// Accepts `YYYY-MM-DD` (midnight UTC), RFC 3339, or a naive date-time read as UTC.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn matrix() -> Matrix {
        parse_str(
            "\
;;Frankreich;Spanien;Italien;Polen;Portugal
Meldepflichtige Entsendetätigkeit;;Ja, SIPSI;Ja;;;
Mobile Arbeit;;keine Meldepflicht;Sonderregelung X;;;
;Hinweis;;;;;
Meldefrist;;vor Beginn;;;;Vorabmeldung
Mobile Arbeit Details;;;;Nicht   Meldepflichtig;;
",
        )
        .unwrap()
    }

    fn request(country: &str, mobile: bool) -> EvaluationRequest {
        EvaluationRequest {
            country_key: country.into(),
            type_of_activity: "installation".into(),
            traveller_role: "technician".into(),
            start_date: "2025-01-01".into(),
            end_date: "2025-01-03".into(),
            is_mobile_only: mobile,
        }
    }

    #[test]
    fn test_mobile_only_exempt() {
        let decision = evaluate(&matrix(), request("Frankreich", true)).unwrap();
        assert!(!decision.requires_notification);
        assert!(decision.rule_explanation.contains("Mobile Arbeit"));
    }

    #[test]
    fn test_mobile_only_conservative_default() {
        let decision = evaluate(&matrix(), request("Spanien", true)).unwrap();
        assert!(decision.requires_notification);
        assert_eq!(decision.rule_explanation, EXPLAIN_MOBILE_SPECIAL);
    }

    #[test]
    fn test_base_rule() {
        let decision = evaluate(&matrix(), request("Frankreich", false)).unwrap();
        assert!(decision.requires_notification);
        assert_eq!(decision.rule_explanation, EXPLAIN_POSTED_ACTIVITY);
    }

    #[test]
    fn test_mobile_flag_without_mobile_entry_uses_base_rule() {
        let m = parse_str(";;FR\nMeldepflichtige Entsendetätigkeit;;Ja\n").unwrap();
        let decision = evaluate(&m, request("FR", true)).unwrap();
        assert!(decision.requires_notification);
        assert_eq!(decision.rule_explanation, EXPLAIN_POSTED_ACTIVITY);
    }

    #[test]
    fn test_no_posted_activity_entry() {
        let decision = evaluate(&matrix(), request("Portugal", false)).unwrap();
        assert!(!decision.requires_notification);
        assert_eq!(decision.rule_explanation, EXPLAIN_NONE);
        assert!(decision.details.contains_key("Meldefrist"));
    }

    #[test]
    fn test_keyword_match_is_case_and_space_insensitive() {
        let m = parse_str(";;IT\nMobile Arbeit;Hinweis;Nicht   MELDEPFLICHTIG\n").unwrap();
        let decision = evaluate(&m, request("IT", true)).unwrap();
        assert!(!decision.requires_notification);
    }

    #[test]
    fn test_country_without_data() {
        let decision = evaluate(&matrix(), request("Polen", true)).unwrap();
        assert!(!decision.requires_notification);
        assert_eq!(decision.rule_explanation, EXPLAIN_NONE);
        assert!(decision.details.is_empty());
    }

    #[test]
    fn test_unknown_country() {
        let err = evaluate(&matrix(), request("Atlantis", false)).unwrap_err();
        assert!(matches!(err, EvaluationError::UnknownCountry(ref k) if k == "Atlantis"));
        assert_eq!(err.to_string(), "Unknown country key: Atlantis");
    }

    #[test]
    fn test_decision_echoes_request_and_details() {
        let decision = evaluate(&matrix(), request("Frankreich", false)).unwrap();
        assert_eq!(decision.duration_days, Some(3));
        assert_eq!(decision.type_of_activity, "installation");

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["countryKey"], "Frankreich");
        assert_eq!(json["requiresNotification"], true);
        assert_eq!(json["durationDays"], 3);
        assert_eq!(json["details"]["Meldefrist"]["_value"], "vor Beginn");
    }

    #[test]
    fn test_duration_days() {
        assert_eq!(duration_days("2025-01-01", "2025-01-03"), Some(3));
        assert_eq!(duration_days("2025-01-01", "2025-01-01"), Some(1));
        assert_eq!(duration_days("2025-01-03", "2025-01-01"), Some(-1));
        assert_eq!(
            duration_days("2025-01-01T08:00:00Z", "2025-01-02T07:00:00Z"),
            Some(1)
        );
        assert_eq!(duration_days("2025-02-28", "2025-03-01T12:00"), Some(2));
    }

    #[test]
    fn test_invalid_date_still_evaluates() {
        let mut req = request("Frankreich", false);
        req.end_date = "bald".into();
        let decision = evaluate(&matrix(), req).unwrap();
        assert_eq!(decision.duration_days, None);
        assert!(decision.requires_notification);

        let json = serde_json::to_value(&decision).unwrap();
        assert!(json["durationDays"].is_null());
    }

    #[test]
    fn test_evaluate_current_not_loaded() {
        let err = evaluate_current(&MatrixStore::new(), request("Frankreich", false)).unwrap_err();
        assert!(matches!(err, EvaluationError::Store(_)));
    }

    #[test]
    fn test_evaluate_current_sees_replacement() {
        let store = MatrixStore::with_matrix(matrix());
        assert!(evaluate_current(&store, request("Frankreich", false))
            .unwrap()
            .requires_notification);

        store.set(parse_str(";;Frankreich\nMeldefrist;;keine\n").unwrap());
        assert!(!evaluate_current(&store, request("Frankreich", false))
            .unwrap()
            .requires_notification);
    }
}
