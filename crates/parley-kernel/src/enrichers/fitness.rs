//! Fitness enrichment: workout parsing with progression targets, and meal
//! logging by keyword category.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parley_intent::UserIntent;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::enricher::{Enricher, EnrichmentRequest, EnrichmentResult};
use crate::error::{KernelError, Result};
use crate::vocabulary::tokenize;

/// Set/rep/weight layouts, tried in order; the first that matches wins.
const EXERCISE_PATTERNS: &[&str] = &[
    // "3x8 banca con 60kg"
    r"(?P<sets>\d+)\s*x\s*(?P<reps>\d+)\s+(?:en\s+)?(?P<name>[a-záéíóúñ\s]+?)(?:\s+con\s+|\s+)(?P<weight>\d+(?:\.\d+)?)\s*(?:kg|kilos)?",
    // "banca 60kg 3x8"
    r"(?P<name>[a-záéíóúñ\s]+?)\s+(?P<weight>\d+(?:\.\d+)?)\s*(?:kg|kilos)?\s+(?P<sets>\d+)\s*x\s*(?P<reps>\d+)",
    // "banca 3 series de 8 con 60"
    r"(?P<name>[a-záéíóúñ\s]+?)\s+(?P<sets>\d+)\s+series?\s+de\s+(?P<reps>\d+)\s+(?:con\s+)?(?P<weight>\d+(?:\.\d+)?)",
];

/// Words dropped from the front of a parsed exercise name.
const NAME_FILLER: &[&str] = &["hoy", "hice", "entrené", "entrene", "y", "luego", "después", "despues", "en"];

const PULL_WORDS: &[&str] = &["pull", "espalda", "bicep", "remo", "dominada"];
const LEGS_WORDS: &[&str] = &["leg", "pierna", "sentadilla", "squat"];
const CARDIO_WORDS: &[&str] = &["cardio", "correr", "bici", "running"];

const STANDARD_EXERCISES: &[(WorkoutType, &[&str])] = &[
    (
        WorkoutType::Push,
        &["Press Banca", "Press Inclinado", "Press Militar", "Fondos", "Extensiones Tríceps"],
    ),
    (
        WorkoutType::Pull,
        &["Dominadas", "Remo con Barra", "Remo Mancuerna", "Face Pulls", "Curl Bíceps"],
    ),
    (
        WorkoutType::Legs,
        &["Sentadilla", "Peso Muerto Rumano", "Prensa", "Curl Femoral", "Pantorrillas"],
    ),
];

const SENSATIONS: &[(&str, f64)] = &[
    ("fuerte", 1.0),
    ("normal", 0.7),
    ("pesado", 0.5),
    ("pesada", 0.5),
    ("molestia", 0.3),
    ("dolor", 0.3),
];
const DEFAULT_SENSATION: f64 = 0.7;

/// Exercises in a session that count as a full workout.
const FULL_SESSION_EXERCISES: f64 = 5.0;

const HEALTHY_FOODS: &[&str] = &["ensalada", "pollo", "pescado", "vegetales", "fruta", "yogurt"];
const HEAVY_FOODS: &[&str] = &["frito", "pizza", "hamburguesa", "tacos", "churros", "refresco"];

const MEAL_TYPES: &[(&str, &[&str])] = &[
    ("desayuno", &["desayuno", "desayuné", "desayune"]),
    ("cena", &["cena", "cené", "cene"]),
    ("snack", &["snack", "botana", "colación", "colacion"]),
    ("comida", &["comida", "comí", "comi", "almuerzo", "almorcé", "almorce"]),
];
const DEFAULT_MEAL: &str = "comida";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum WorkoutType {
    Push,
    Pull,
    Legs,
    Cardio,
}

impl WorkoutType {
    fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "pull" => Self::Pull,
            "legs" => Self::Legs,
            "cardio" => Self::Cardio,
            _ => Self::Push,
        }
    }

    /// Keyword detection; push when nothing matches.
    fn detect(lowered: &str) -> Self {
        let any = |words: &[&str]| words.iter().any(|w| lowered.contains(w));
        if any(PULL_WORDS) {
            Self::Pull
        } else if any(LEGS_WORDS) {
            Self::Legs
        } else if any(CARDIO_WORDS) {
            Self::Cardio
        } else {
            Self::Push
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SessionRating {
    Excellent,
    Good,
    Normal,
    Poor,
}

impl SessionRating {
    fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => Self::Excellent,
            s if s >= 0.6 => Self::Good,
            s if s >= 0.4 => Self::Normal,
            _ => Self::Poor,
        }
    }

    fn feedback(self) -> &'static str {
        match self {
            Self::Excellent => "¡Sesión excelente! Sigue así.",
            Self::Good => "Buena sesión, mantén la consistencia.",
            Self::Normal => "Sesión normal. Cada día cuenta.",
            Self::Poor => "Sesión complicada. Descansa y vuelve más fuerte.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct SetEntry {
    reps: u32,
    weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Exercise {
    name: String,
    sets: Vec<SetEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'static str>,
}

// ---------------------------------------------------------------------------
// FitnessEnricher
// ---------------------------------------------------------------------------

/// Heuristic enricher for gym and nutrition intents.
pub struct FitnessEnricher {
    exercise_patterns: Vec<Regex>,
}

impl FitnessEnricher {
    pub const NAME: &'static str = "FitnessEnricher";

    const INTENTS: &'static [UserIntent] = &[
        UserIntent::GymLog,
        UserIntent::GymQuery,
        UserIntent::NutritionLog,
        UserIntent::NutritionQuery,
    ];

    pub fn new() -> Result<Self> {
        let exercise_patterns = EXERCISE_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| KernelError::InvalidPattern {
                    pattern: (*p).to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { exercise_patterns })
    }

    fn parse_exercises(&self, lowered: &str, workout_type: WorkoutType) -> Vec<Exercise> {
        for re in &self.exercise_patterns {
            let parsed: Vec<Exercise> = re.captures_iter(lowered).filter_map(exercise_from).collect();
            if !parsed.is_empty() {
                return parsed;
            }
        }

        STANDARD_EXERCISES
            .iter()
            .filter(|(kind, _)| *kind == workout_type)
            .flat_map(|(_, names)| names.iter())
            .filter(|name| lowered.contains(&name.to_lowercase()))
            .map(|name| Exercise {
                name: (*name).to_string(),
                sets: Vec::new(),
                notes: Some("Detalles no especificados"),
            })
            .collect()
    }

    fn log_workout(&self, request: &EnrichmentRequest) -> serde_json::Value {
        let lowered = request.text.to_lowercase();
        let workout_type = request
            .entity("workout_type")
            .map_or_else(|| WorkoutType::detect(&lowered), WorkoutType::from_tag);

        let exercises = self.parse_exercises(&lowered, workout_type);
        let tokens = tokenize(&request.text);
        let sensation = SENSATIONS
            .iter()
            .find(|(word, _)| tokens.iter().any(|t| t == word))
            .map_or(DEFAULT_SENSATION, |(_, score)| *score);

        let volume: f64 = exercises
            .iter()
            .flat_map(|e| e.sets.iter())
            .map(|s| f64::from(s.reps) * s.weight)
            .sum();
        let total_sets: usize = exercises.iter().map(|e| e.sets.len()).sum();

        // No session history, so the score weighs volume of work and how it felt.
        let coverage = (exercises.len() as f64 / FULL_SESSION_EXERCISES).min(1.0);
        let rating = SessionRating::from_score(coverage * 0.5 + sensation * 0.5);
        let mut feedback = rating.feedback().to_string();
        if sensation < 0.5 {
            feedback.push_str(" Revisa la técnica y considera descanso si persiste.");
        }

        json!({
            "workout_type": workout_type,
            "exercises": exercises,
            "total_sets": total_sets,
            "volume_kg": volume,
            "rating": rating,
            "feedback": feedback,
            "next_targets": next_targets(&exercises),
        })
    }
}

#[async_trait]
impl Enricher for FitnessEnricher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn intents(&self) -> &[UserIntent] {
        Self::INTENTS
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResult> {
        let mut result = EnrichmentResult::named(Self::NAME);
        match request.intent {
            UserIntent::GymLog => {
                result.workout_data = Some(self.log_workout(request));
                result.agents_used.push("workout".into());
            }
            UserIntent::GymQuery => {
                result.workout_data = Some(history_query(&request.text));
            }
            UserIntent::NutritionLog => {
                result.nutrition_data = Some(log_meal(request));
                result.agents_used.push("nutrition".into());
            }
            UserIntent::NutritionQuery => {
                result.nutrition_data = Some(history_query(&request.text));
            }
            _ => {}
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

fn exercise_from(caps: regex::Captures<'_>) -> Option<Exercise> {
    let sets: u32 = caps.name("sets")?.as_str().parse().ok()?;
    let reps: u32 = caps.name("reps")?.as_str().parse().ok()?;
    let weight: f64 = caps.name("weight")?.as_str().parse().ok()?;

    let words: Vec<&str> = caps
        .name("name")?
        .as_str()
        .split_whitespace()
        .skip_while(|w| NAME_FILLER.contains(w))
        .collect();
    if words.is_empty() || sets == 0 {
        return None;
    }

    Some(Exercise {
        name: title_case(&words),
        sets: vec![SetEntry { reps, weight }; sets as usize],
        notes: None,
    })
}

fn title_case(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Progression per exercise from its best set: more weight once reps reach
/// 12, otherwise one more rep.
fn next_targets(exercises: &[Exercise]) -> BTreeMap<String, String> {
    exercises
        .iter()
        .filter_map(|exercise| {
            let best = exercise
                .sets
                .iter()
                .max_by(|a, b| {
                    (f64::from(a.reps) * a.weight).total_cmp(&(f64::from(b.reps) * b.weight))
                })?;
            let target = if best.reps >= 12 {
                format!("{}kg x 8-10 reps", best.weight + 2.5)
            } else {
                format!("{}kg x {} reps", best.weight, best.reps + 1)
            };
            Some((exercise.name.clone(), target))
        })
        .collect()
}

fn log_meal(request: &EnrichmentRequest) -> serde_json::Value {
    let lowered = request.text.to_lowercase();
    let tokens = tokenize(&request.text);
    let meal_type = request.entity("meal").map_or_else(
        || {
            MEAL_TYPES
                .iter()
                .find(|(_, words)| words.iter().any(|w| tokens.iter().any(|t| t == w)))
                .map_or(DEFAULT_MEAL, |(meal, _)| *meal)
                .to_string()
        },
        str::to_string,
    );

    let (category, calories) = if HEALTHY_FOODS.iter().any(|f| lowered.contains(f)) {
        ("saludable", 400)
    } else if HEAVY_FOODS.iter().any(|f| lowered.contains(f)) {
        ("pesado", 900)
    } else {
        ("moderado", 600)
    };

    json!({
        "meal_type": meal_type,
        "description": request.text,
        "calories": calories,
        "category": category,
    })
}

fn history_query(text: &str) -> serde_json::Value {
    json!({ "query_type": "history", "raw_query": text })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn request(intent: UserIntent, text: &str) -> EnrichmentRequest {
        EnrichmentRequest::new("ana", intent, text)
    }

    #[tokio::test]
    async fn workout_sets_and_targets() {
        let enricher = FitnessEnricher::new().unwrap();
        let req = request(
            UserIntent::GymLog,
            "hoy hice press banca 60kg 3x8, fondos 20kg 3x12",
        );
        let result = enricher.enrich(&req).await.unwrap();
        let data = result.workout_data.unwrap();

        assert_eq!(data["workout_type"], "push");
        let exercises = data["exercises"].as_array().unwrap();
        assert_eq!(exercises.len(), 2);
        assert_eq!(exercises[0]["name"], "Press Banca");
        assert_eq!(exercises[0]["sets"].as_array().unwrap().len(), 3);
        assert_eq!(exercises[0]["sets"][0]["reps"], 8);
        assert_eq!(data["total_sets"], 6);
        assert_eq!(data["volume_kg"], 3.0 * 8.0 * 60.0 + 3.0 * 12.0 * 20.0);
        assert_eq!(data["next_targets"]["Press Banca"], "60kg x 9 reps");
        assert_eq!(data["next_targets"]["Fondos"], "22.5kg x 8-10 reps");
        assert_eq!(result.agents_used, vec!["workout"]);
    }

    #[test]
    fn sets_first_and_series_layouts() {
        let enricher = FitnessEnricher::new().unwrap();

        let parsed = enricher.parse_exercises("4x10 remo con 50kg", WorkoutType::Pull);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "Remo");
        assert_eq!(parsed[0].sets.len(), 4);
        assert_eq!(parsed[0].sets[0], SetEntry { reps: 10, weight: 50.0 });

        let parsed = enricher.parse_exercises("sentadilla 5 series de 5 con 100", WorkoutType::Legs);
        assert_eq!(parsed[0].name, "Sentadilla");
        assert_eq!(parsed[0].sets.len(), 5);
    }

    #[test]
    fn unparsed_workout_falls_back_to_standard_names() {
        let enricher = FitnessEnricher::new().unwrap();
        let parsed = enricher.parse_exercises("dominadas y face pulls, me sentí fuerte", WorkoutType::Pull);
        let names: Vec<&str> = parsed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Dominadas", "Face Pulls"]);
        assert!(parsed.iter().all(|e| e.sets.is_empty()));
    }

    #[tokio::test]
    async fn type_detection_and_entity_override() {
        let enricher = FitnessEnricher::new().unwrap();
        let legs = enricher
            .enrich(&request(UserIntent::GymLog, "día de pierna"))
            .await
            .unwrap();
        assert_eq!(legs.workout_data.unwrap()["workout_type"], "legs");

        let mut entities = HashMap::new();
        entities.insert("workout_type".to_string(), "Cardio".to_string());
        let req = request(UserIntent::GymLog, "día de pierna").with_entities(entities);
        let cardio = enricher.enrich(&req).await.unwrap();
        assert_eq!(cardio.workout_data.unwrap()["workout_type"], "cardio");
    }

    #[tokio::test]
    async fn discomfort_lowers_rating_and_warns() {
        let enricher = FitnessEnricher::new().unwrap();
        let data = enricher
            .enrich(&request(UserIntent::GymLog, "gym con molestia en el hombro"))
            .await
            .unwrap()
            .workout_data
            .unwrap();
        assert_eq!(data["rating"], "poor");
        assert!(data["feedback"].as_str().unwrap().contains("Revisa la técnica"));
    }

    #[tokio::test]
    async fn meal_category_and_type() {
        let enricher = FitnessEnricher::new().unwrap();
        let data = enricher
            .enrich(&request(UserIntent::NutritionLog, "cené pizza y refresco"))
            .await
            .unwrap()
            .nutrition_data
            .unwrap();
        assert_eq!(data["meal_type"], "cena");
        assert_eq!(data["category"], "pesado");
        assert_eq!(data["calories"], 900);

        let data = log_meal(&request(UserIntent::NutritionLog, "ensalada de pollo"));
        assert_eq!(data["meal_type"], "comida");
        assert_eq!(data["category"], "saludable");
    }

    #[tokio::test]
    async fn queries_echo_the_question() {
        let enricher = FitnessEnricher::new().unwrap();
        let result = enricher
            .enrich(&request(UserIntent::GymQuery, "mis entrenamientos"))
            .await
            .unwrap();
        assert_eq!(result.workout_data.unwrap()["query_type"], "history");
        assert!(result.agents_used.is_empty());
    }
}
