//! Keyword intent classification.
//!
//! Resolution rules, in order:
//! 1. Every explicit financial category that matches is returned, in
//!    priority order, deduplicated by tool.
//! 2. Generic money phrasing applies only when no explicit category matched.
//! 3. A greeting applies only when nothing above matched and yields no tools.
//! 4. Anything else falls through to the general bucket.

use regex::Regex;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    CreditProfile,
    RetirementSavings,
    Investments,
    TransactionHistory,
    FinancialBalance,
    GenericFinance,
    Greeting,
    General,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditProfile => "credit_profile",
            Self::RetirementSavings => "retirement_savings",
            Self::Investments => "investments",
            Self::TransactionHistory => "transaction_history",
            Self::FinancialBalance => "financial_balance",
            Self::GenericFinance => "generic_finance",
            Self::Greeting => "greeting",
            Self::General => "general",
        }
    }
}

/// A tool the turn should call, tagged with the category that selected it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolIntent {
    pub category: IntentCategory,
    pub tool_name: String,
}

impl ToolIntent {
    pub fn new(category: IntentCategory, tool_name: impl Into<String>) -> Self {
        Self {
            category,
            tool_name: tool_name.into(),
        }
    }
}

/// Maps an utterance to the ordered list of tools to call.
pub trait Router: Send + Sync {
    fn classify(&self, utterance: &str) -> Vec<ToolIntent>;
}

pub const DEFAULT_SUMMARY_TOOL: &str = "fetch_net_worth";

struct Rule {
    category: IntentCategory,
    tool: Option<&'static str>,
    pattern: Regex,
}

/// Fixed-priority keyword router over word-boundary, case-insensitive
/// patterns.
pub struct KeywordRouter {
    explicit: Vec<Rule>,
    generic: Rule,
    greeting: Rule,
}

fn rule(category: IntentCategory, tool: Option<&'static str>, words: &[&str]) -> Result<Rule, regex::Error> {
    let alternation = words
        .iter()
        .map(|w| w.split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Rule {
        category,
        tool,
        pattern: Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))?,
    })
}

impl KeywordRouter {
    pub fn new() -> Result<Self, regex::Error> {
        use IntentCategory::*;
        Ok(Self {
            explicit: vec![
                rule(
                    CreditProfile,
                    Some("fetch_credit_report"),
                    &[
                        "credit", "credit score", "cibil", "loan", "loans", "emi", "emis", "debt",
                        "debts", "borrow", "borrowing", "liability", "liabilities",
                    ],
                )?,
                rule(
                    RetirementSavings,
                    Some("fetch_epf_details"),
                    &["epf", "pf", "provident", "provident fund", "retirement", "retire", "pension", "uan"],
                )?,
                rule(
                    Investments,
                    Some("fetch_mf_transactions"),
                    &[
                        "mutual fund", "mutual funds", "mf", "sip", "sips", "portfolio", "invest",
                        "invested", "investing", "investment", "investments", "returns",
                    ],
                )?,
                rule(
                    TransactionHistory,
                    Some("fetch_bank_transactions"),
                    &[
                        "transaction", "transactions", "spend", "spent", "spending", "expense",
                        "expenses", "income", "salary", "cash flow", "payment", "payments",
                    ],
                )?,
                rule(
                    FinancialBalance,
                    Some("fetch_net_worth"),
                    &[
                        "balance", "balances", "net worth", "networth", "savings", "assets",
                        "wealth", "bank account",
                    ],
                )?,
            ],
            generic: rule(
                GenericFinance,
                Some(DEFAULT_SUMMARY_TOOL),
                &["how much", "what is my", "what's my", "whats my", "can i afford", "afford", "money", "budget"],
            )?,
            greeting: rule(
                Greeting,
                None,
                &[
                    "hi", "hello", "hey", "thanks", "thank you", "good morning", "good evening",
                    "good afternoon",
                ],
            )?,
        })
    }
}

impl Router for KeywordRouter {
    fn classify(&self, utterance: &str) -> Vec<ToolIntent> {
        let mut intents: Vec<ToolIntent> = Vec::new();
        for rule in &self.explicit {
            if let Some(tool) = rule.tool {
                if rule.pattern.is_match(utterance) && !intents.iter().any(|i| i.tool_name == tool) {
                    intents.push(ToolIntent::new(rule.category, tool));
                }
            }
        }
        if !intents.is_empty() {
            return intents;
        }

        if let Some(tool) = self.generic.tool.filter(|_| self.generic.pattern.is_match(utterance)) {
            return vec![ToolIntent::new(self.generic.category, tool)];
        }

        if self.greeting.pattern.is_match(utterance) {
            return Vec::new();
        }

        vec![ToolIntent::new(IntentCategory::General, DEFAULT_SUMMARY_TOOL)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(utterance: &str) -> Vec<String> {
        KeywordRouter::new()
            .unwrap()
            .classify(utterance)
            .into_iter()
            .map(|i| i.tool_name)
            .collect()
    }

    fn categories(utterance: &str) -> Vec<IntentCategory> {
        KeywordRouter::new()
            .unwrap()
            .classify(utterance)
            .into_iter()
            .map(|i| i.category)
            .collect()
    }

    #[test]
    fn resolution_table() {
        let cases: &[(&str, &[&str])] = &[
            ("what's my balance", &["fetch_net_worth"]),
            ("What is my CIBIL score?", &["fetch_credit_report"]),
            ("how is my PF doing", &["fetch_epf_details"]),
            ("show my mutual funds", &["fetch_mf_transactions"]),
            ("list my recent transactions", &["fetch_bank_transactions"]),
            (
                "can I take a loan against my mutual fund portfolio",
                &["fetch_credit_report", "fetch_mf_transactions"],
            ),
            (
                "compare my spending with my savings",
                &["fetch_bank_transactions", "fetch_net_worth"],
            ),
            ("can i afford a new car", &["fetch_net_worth"]),
            ("how much do I have", &["fetch_net_worth"]),
            ("hello there", &[]),
            ("thank you!", &[]),
            ("recommend a pasta recipe", &["fetch_net_worth"]),
        ];
        for (utterance, expected) in cases {
            assert_eq!(tools(utterance), *expected, "utterance: {utterance}");
        }
    }

    #[test]
    fn explicit_categories_follow_priority_order() {
        let got = categories("my savings, spending, sip, pension and emi");
        assert_eq!(
            got,
            vec![
                IntentCategory::CreditProfile,
                IntentCategory::RetirementSavings,
                IntentCategory::Investments,
                IntentCategory::TransactionHistory,
                IntentCategory::FinancialBalance,
            ]
        );
    }

    #[test]
    fn generic_yields_to_explicit() {
        assert_eq!(categories("how much debt do I have"), vec![IntentCategory::CreditProfile]);
        assert_eq!(categories("how much do I have"), vec![IntentCategory::GenericFinance]);
    }

    #[test]
    fn greeting_yields_to_finance() {
        assert_eq!(categories("hi, what's my net worth"), vec![IntentCategory::FinancialBalance]);
        assert_eq!(categories("hey, how much can I spend"), vec![IntentCategory::TransactionHistory]);
    }

    #[test]
    fn matches_respect_word_boundaries() {
        // "pf" inside "pdfs", "emi" inside "premium", "hi" inside "this"
        assert_eq!(categories("send me the pdfs about this premium plan"), vec![IntentCategory::General]);
    }

    #[test]
    fn multi_word_keywords_tolerate_spacing() {
        assert_eq!(tools("what is my NET   WORTH"), vec!["fetch_net_worth"]);
    }

    #[test]
    fn no_duplicate_tools() {
        let got = tools("balance savings net worth assets wealth");
        assert_eq!(got, vec!["fetch_net_worth"]);
    }
}
