//! Retention and compliance policies per data category

use super::*;
use serde_json::Value;

/// Field names treated as sensitive when no list is configured
pub fn default_sensitive_fields() -> Vec<String> {
    ["diagnosis", "treatment", "medication", "medical_condition", "therapy_notes"]
        .iter()
        .map(|field| field.to_string())
        .collect()
}

/// Outcome of a compliance check on one payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub category: String,
    pub compliant: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Static retention table with a permissive fallback for unknown categories
#[derive(Debug, Clone)]
pub struct RetentionPolicyTable {
    policies: BTreeMap<String, DataRetentionPolicy>,
    sensitive_fields: Vec<String>,
}

impl RetentionPolicyTable {
    pub fn new(sensitive_fields: Vec<String>) -> Self {
        let policies = builtin_policies()
            .into_iter()
            .map(|policy| (policy.category.clone(), policy))
            .collect();

        Self {
            policies,
            sensitive_fields: sensitive_fields
                .into_iter()
                .map(|field| field.to_lowercase())
                .collect(),
        }
    }

    /// Policy for `category`; unknown categories get the default policy
    pub fn get_policy(&self, category: &str) -> DataRetentionPolicy {
        self.policies
            .get(category)
            .cloned()
            .unwrap_or_else(|| default_policy(category))
    }

    pub fn categories(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    pub fn policies(&self) -> Vec<DataRetentionPolicy> {
        self.policies.values().cloned().collect()
    }

    /// True when a record created at `created_at` has outlived its category
    pub fn should_auto_delete(&self, category: &str, created_at: DateTime<Utc>) -> bool {
        self.should_auto_delete_at(category, created_at, Utc::now())
    }

    pub fn should_auto_delete_at(
        &self,
        category: &str,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let policy = self.get_policy(category);
        now - created_at > Duration::days(i64::from(policy.auto_delete_after_days))
    }

    /// Flag sensitive fields stored without the consent their category requires
    pub fn check_compliance(&self, category: &str, payload: &Value, consent_granted: bool) -> ComplianceReport {
        let policy = self.get_policy(category);
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let mut found = Vec::new();
        collect_sensitive_keys(payload, &self.sensitive_fields, &mut found);
        found.sort();
        found.dedup();

        if policy.requires_explicit_consent && !consent_granted && !found.is_empty() {
            issues.push(format!(
                "Sensitive fields stored without explicit consent: {}",
                found.join(", ")
            ));
            recommendations.push(format!(
                "Obtain explicit consent before storing {} data",
                category
            ));
        }

        if !found.is_empty() {
            recommendations.push("Encrypt sensitive fields before persisting them".to_string());
        }

        ComplianceReport {
            category: category.to_string(),
            compliant: issues.is_empty(),
            issues,
            recommendations,
        }
    }
}

impl Default for RetentionPolicyTable {
    fn default() -> Self {
        Self::new(default_sensitive_fields())
    }
}

fn collect_sensitive_keys(value: &Value, sensitive: &[String], found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let lowered = key.to_lowercase();
                if sensitive.iter().any(|field| *field == lowered) {
                    found.push(key.clone());
                }
                collect_sensitive_keys(nested, sensitive, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_sensitive_keys(item, sensitive, found);
            }
        }
        _ => {}
    }
}

fn default_policy(category: &str) -> DataRetentionPolicy {
    DataRetentionPolicy {
        category: category.to_string(),
        max_retention_days: 365,
        auto_delete_after_days: 365,
        requires_explicit_consent: false,
        allow_data_export: true,
        allow_data_deletion: true,
    }
}

fn builtin_policies() -> Vec<DataRetentionPolicy> {
    let policy = |category: &str, max: u32, auto: u32, consent: bool, export: bool, delete: bool| {
        DataRetentionPolicy {
            category: category.to_string(),
            max_retention_days: max,
            auto_delete_after_days: auto,
            requires_explicit_consent: consent,
            allow_data_export: export,
            allow_data_deletion: delete,
        }
    };

    vec![
        policy("therapy_goals", 2555, 2555, true, true, true),
        policy("communication_data", 1095, 1095, true, true, true),
        policy("usage_analytics", 365, 90, false, true, true),
        policy("progress_data", 2555, 2555, true, true, true),
        policy("user_profile", 3650, 3650, true, true, true),
        // Audit trails must survive user deletion requests
        policy("audit_logs", 2555, 2555, false, false, false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_is_permissive() {
        let table = RetentionPolicyTable::default();
        let policy = table.get_policy("something_new");

        assert_eq!(policy.category, "something_new");
        assert_eq!(policy.max_retention_days, 365);
        assert!(policy.allow_data_export);
        assert!(policy.allow_data_deletion);
        assert!(!policy.requires_explicit_consent);
    }

    #[test]
    fn test_builtin_table() {
        let table = RetentionPolicyTable::default();
        assert_eq!(table.categories().len(), 6);

        let audit = table.get_policy("audit_logs");
        assert!(!audit.allow_data_export);
        assert!(!audit.allow_data_deletion);
        assert!(table.get_policy("therapy_goals").requires_explicit_consent);
    }

    #[test]
    fn test_should_auto_delete() {
        let table = RetentionPolicyTable::default();
        let now = Utc::now();

        assert!(table.should_auto_delete_at("usage_analytics", now - Duration::days(91), now));
        assert!(!table.should_auto_delete_at("usage_analytics", now - Duration::days(89), now));
        assert!(!table.should_auto_delete_at("usage_analytics", now - Duration::days(90), now));
        assert!(!table.should_auto_delete("therapy_goals", now - Duration::days(400)));
    }

    #[test]
    fn test_compliance_flags_nested_sensitive_fields() {
        let table = RetentionPolicyTable::default();
        let payload = serde_json::json!({
            "goal": "request help",
            "clinical": { "Diagnosis": "apraxia", "sessions": [{ "therapy_notes": "..." }] }
        });

        let report = table.check_compliance("therapy_goals", &payload, false);
        assert!(!report.compliant);
        assert!(report.issues[0].contains("Diagnosis"));
        assert!(report.issues[0].contains("therapy_notes"));

        let consented = table.check_compliance("therapy_goals", &payload, true);
        assert!(consented.compliant);

        let no_consent_needed = table.check_compliance("usage_analytics", &payload, false);
        assert!(no_consent_needed.compliant);
    }

    #[test]
    fn test_custom_sensitive_fields() {
        let table = RetentionPolicyTable::new(vec!["allergy".to_string()]);
        let payload = serde_json::json!({ "allergy": "peanuts", "diagnosis": "x" });

        let report = table.check_compliance("user_profile", &payload, false);
        assert!(!report.compliant);
        assert!(report.issues[0].contains("allergy"));
        assert!(!report.issues[0].contains("diagnosis"));
    }
}
