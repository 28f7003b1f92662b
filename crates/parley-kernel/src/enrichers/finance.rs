//! Finance enrichment: purchase analysis against a fixed monthly profile,
//! expense logging and debt lookups.

use async_trait::async_trait;
use parley_intent::UserIntent;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::enricher::{Enricher, EnrichmentRequest, EnrichmentResult};
use crate::error::{KernelError, Result};
use crate::vocabulary::tokenize;

const AMOUNT_PATTERNS: &[&str] = &[
    r"\$\s*(\d[\d,]*(?:\.\d{2})?)",
    r"(?i)(\d[\d,]*(?:\.\d{2})?)\s*pesos",
    r"(?i)(\d[\d,]*(?:\.\d{2})?)\s*mxn",
];

const ESSENTIAL_WORDS: &[&str] = &[
    "renta",
    "luz",
    "agua",
    "gas",
    "internet",
    "medicina",
    "doctor",
    "súper",
    "super",
    "comida",
    "transporte",
    "colegiatura",
    "seguro",
];

const MAX_QUESTIONS: usize = 3;

/// Monthly figures a purchase is weighed against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinanceProfile {
    pub monthly_budget: f64,
    pub current_savings: f64,
    pub pending_debts: f64,
}

impl Default for FinanceProfile {
    fn default() -> Self {
        Self {
            monthly_budget: 15_000.0,
            current_savings: 5_000.0,
            pending_debts: 3_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum BudgetImpact {
    Minimal,
    Moderate,
    Significant,
    Critical,
}

impl BudgetImpact {
    fn from_share(amount: f64, budget: f64) -> Self {
        if budget <= 0.0 {
            return Self::Critical;
        }
        match amount / budget * 100.0 {
            p if p < 5.0 => Self::Minimal,
            p if p < 15.0 => Self::Moderate,
            p if p < 30.0 => Self::Significant,
            _ => Self::Critical,
        }
    }

    fn weight(self) -> u8 {
        match self {
            Self::Minimal => 1,
            Self::Moderate => 2,
            Self::Significant => 3,
            Self::Critical => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Recommendation {
    Buy,
    Wait,
    Wishlist,
    Skip,
}

impl Recommendation {
    fn decide(necessity: u8, impact: BudgetImpact) -> Self {
        match (necessity, impact.weight()) {
            (8.., ..=2) => Self::Buy,
            (6.., ..=3) => Self::Wait,
            (4.., _) => Self::Wishlist,
            _ => Self::Skip,
        }
    }
}

/// Heuristic enricher for expenses and debts.
pub struct FinanceEnricher {
    amount_patterns: Vec<Regex>,
    profile: FinanceProfile,
}

impl FinanceEnricher {
    pub const NAME: &'static str = "FinanceEnricher";

    const INTENTS: &'static [UserIntent] = &[
        UserIntent::ExpenseAnalyze,
        UserIntent::ExpenseLog,
        UserIntent::DebtQuery,
    ];

    pub fn new() -> Result<Self> {
        let amount_patterns = AMOUNT_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| KernelError::InvalidPattern {
                    pattern: (*p).to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            amount_patterns,
            profile: FinanceProfile::default(),
        })
    }

    pub fn with_profile(mut self, profile: FinanceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// First amount in `text`, thousands separators removed.
    fn extract_amount(&self, text: &str) -> Option<String> {
        self.amount_patterns.iter().find_map(|re| {
            re.captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().replace(',', ""))
        })
    }

    fn amount(&self, request: &EnrichmentRequest) -> Option<String> {
        request
            .entity("amount")
            .map(|a| a.replace(',', ""))
            .or_else(|| self.extract_amount(&request.text))
    }

    fn analyze_purchase(&self, request: &EnrichmentRequest) -> serde_json::Value {
        let item = request.entity("item").unwrap_or(request.text.as_str());
        let amount = self.amount(request);
        let value = amount
            .as_deref()
            .and_then(|a| a.parse::<f64>().ok())
            .unwrap_or(0.0);

        let essential = is_essential(item);
        let necessity = if essential { 8 } else { 4 };
        let impact = BudgetImpact::from_share(value, self.profile.monthly_budget);
        let recommendation = Recommendation::decide(necessity, impact);

        json!({
            "item": item,
            "amount": amount,
            "is_essential": essential,
            "necessity_score": necessity,
            "impact": impact,
            "recommendation": recommendation,
            "budget_after_purchase": self.profile.monthly_budget - value,
            "savings_after_purchase": self.profile.current_savings - value,
            "debt_impact": debt_impact(value, self.profile.pending_debts),
            "honest_questions": honest_questions(essential, impact),
            "wait_suggestion": wait_suggestion(recommendation),
        })
    }
}

#[async_trait]
impl Enricher for FinanceEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intents(&self) -> &[UserIntent] {
        Self::INTENTS
    }

    fn min_confidence(&self) -> f64 {
        0.5
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult> {
        let mut result = EnrichmentResult::named(Self::NAME);
        match request.intent {
            UserIntent::ExpenseAnalyze => {
                result.financial_analysis = Some(self.analyze_purchase(request));
                result.agents_used.push("spending".into());
            }
            UserIntent::ExpenseLog => {
                result.financial_analysis = Some(json!({
                    "amount": self.amount(request),
                    "description": request.entity("item").unwrap_or(request.text.as_str()),
                    "type": "expense_log",
                }));
            }
            UserIntent::DebtQuery => {
                // No debt source is wired in yet.
                result.financial_analysis = Some(json!({ "message": "No hay deudas registradas" }));
            }
            _ => {}
        }
        Ok(result)
    }
}

fn is_essential(item: &str) -> bool {
    tokenize(item)
        .iter()
        .any(|t| ESSENTIAL_WORDS.contains(&t.as_str()))
}

fn debt_impact(amount: f64, debt: f64) -> String {
    if debt <= 0.0 {
        return "Sin impacto (sin deuda activa)".to_string();
    }
    let share = amount / debt * 100.0;
    if share >= 10.0 {
        format!("Podrías reducir tu deuda un {share:.1}% con este dinero")
    } else if share >= 5.0 {
        format!("Representa {share:.1}% de tu deuda actual")
    } else {
        "Impacto mínimo en tu deuda".to_string()
    }
}

fn honest_questions(essential: bool, impact: BudgetImpact) -> Vec<&'static str> {
    let mut questions = Vec::with_capacity(MAX_QUESTIONS);
    if !essential {
        questions.push("¿Lo necesitas o solo lo quieres?");
        questions.push("¿Lo seguirías queriendo en 30 días?");
    }
    if impact.weight() >= 3 {
        questions.push("¿Este dinero no estaría mejor pagando deuda?");
    }
    questions.push("¿Ya comparaste precios?");
    questions.truncate(MAX_QUESTIONS);
    questions
}

fn wait_suggestion(recommendation: Recommendation) -> Option<&'static str> {
    match recommendation {
        Recommendation::Buy => None,
        Recommendation::Wait => Some("Espera 48 horas antes de decidir"),
        Recommendation::Wishlist => Some("Agrégalo a tu wishlist y revísalo en 30 días"),
        Recommendation::Skip => Some("Mejor no comprarlo este mes"),
    }
}
