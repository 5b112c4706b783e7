#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Resolution of semantic account roles (AR, AP, INVENTORY, COGS, ...) to
//! concrete account codes. Domain services never hard-code an account code;
//! they ask the rule engine.

use chrono::NaiveDate;
use khata_store::AccountRuleRow;
use khata_store::CompanyId;
use khata_store::State;
use khata_store::Store;

pub type RulesResult<T> = Result<T, RulesError>;

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("no account rule matches {rule_type} for company {company_id}")]
    RuleNotFound {
        company_id: CompanyId,
        rule_type: String,
    },
}

/// Well-known rule types. Free-form strings are accepted too; these are the
/// roles the seeded services depend on.
pub mod rule_types {
    pub const AR: &str = "AR";
    pub const AP: &str = "AP";
    pub const INVENTORY: &str = "INVENTORY";
    pub const COGS: &str = "COGS";
    pub const BANK_DEFAULT: &str = "BANK_DEFAULT";
    pub const RECEIPT_CREDIT: &str = "RECEIPT_CREDIT";
    pub const INV_ADJUST: &str = "INV_ADJUST";
}

#[derive(Clone)]
pub struct RuleEngine {
    store: Store,
}

impl RuleEngine {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Stand-alone resolution against committed state.
    pub async fn resolve(
        &self,
        company_id: CompanyId,
        rule_type: &str,
        qualifiers: &[(&str, &str)],
        on_date: NaiveDate,
    ) -> RulesResult<String> {
        let rule_type = rule_type.to_string();
        let qualifiers: Vec<(String, String)> = qualifiers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.store
            .read(move |state| {
                let pairs: Vec<(&str, &str)> = qualifiers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                resolve_in(state, company_id, &rule_type, &pairs, on_date)
            })
            .await
    }
}

/// Transaction-scoped resolution; used by domain services that already hold
/// an open transaction.
pub fn resolve_in(
    state: &State,
    company_id: CompanyId,
    rule_type: &str,
    qualifiers: &[(&str, &str)],
    on_date: NaiveDate,
) -> RulesResult<String> {
    let mut candidates: Vec<(&AccountRuleRow, usize)> = state
        .rules_for(company_id, rule_type)
        .into_iter()
        .filter(|rule| is_effective(rule, on_date))
        .filter_map(|rule| specificity(rule, qualifiers).map(|score| (rule, score)))
        .collect();

    // Highest priority wins; among equals the more specific match, then the
    // most recently effective row.
    candidates.sort_by(|(a, sa), (b, sb)| {
        b.priority
            .cmp(&a.priority)
            .then(sb.cmp(sa))
            .then(b.effective_from.cmp(&a.effective_from))
    });

    candidates
        .first()
        .map(|(rule, _)| rule.account_code.clone())
        .ok_or_else(|| RulesError::RuleNotFound {
            company_id,
            rule_type: rule_type.to_string(),
        })
}

fn is_effective(rule: &AccountRuleRow, on_date: NaiveDate) -> bool {
    if rule.effective_from > on_date {
        return false;
    }
    match rule.effective_to {
        Some(until) => on_date <= until,
        None => true,
    }
}

/// `None` when the rule's qualifier contradicts the supplied ones, otherwise
/// the number of supplied qualifiers the rule pinned down.
fn specificity(rule: &AccountRuleRow, qualifiers: &[(&str, &str)]) -> Option<usize> {
    match (&rule.qualifier_key, &rule.qualifier_value) {
        (None, _) => Some(0),
        (Some(key), value) => {
            let supplied = qualifiers.iter().find(|(k, _)| k == key)?;
            match value {
                Some(value) if value == supplied.1 => Some(1),
                Some(_) => None,
                // A keyed rule without a value matches any supplied value.
                None => Some(1),
            }
        }
    }
}
