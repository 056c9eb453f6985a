//! Traveller profile supplied alongside a conversation
//!
//! Read-only to the engine. Classification, generation and validation each
//! render a different slice of it into their prompts.

use serde::{Deserialize, Serialize};

/// Language used for the UI or for answers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Language {
    #[default]
    #[serde(rename = "EN")]
    English,
    #[serde(rename = "KO")]
    Korean,
}

impl Language {
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Korean => "Korean",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Cabin {
    Economy,
    Premium,
    Business,
    First,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Tourism,
    Business,
    Family,
    Study,
    Other,
}

impl TripType {
    fn as_str(&self) -> &'static str {
        match self {
            TripType::OneWay => "one_way",
            TripType::RoundTrip => "round_trip",
        }
    }
}

impl Purpose {
    fn as_str(&self) -> &'static str {
        match self {
            Purpose::Tourism => "tourism",
            Purpose::Business => "business",
            Purpose::Family => "family",
            Purpose::Study => "study",
            Purpose::Other => "other",
        }
    }
}

/// Travel profile for one conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TripContext {
    #[serde(default)]
    pub ui_language: Language,
    #[serde(default)]
    pub answer_language: Language,

    /// Passport country (ISO alpha-2)
    #[serde(default)]
    pub nationality_country_code: Option<String>,

    #[serde(default)]
    pub origin_country_code: Option<String>,
    #[serde(default)]
    pub origin_city_or_airport: Option<String>,

    #[serde(default)]
    pub destination_country_code: Option<String>,
    #[serde(default)]
    pub destination_city_or_airport: Option<String>,

    #[serde(default)]
    pub trip_type: Option<TripType>,
    #[serde(default)]
    pub departure_date: Option<String>,
    #[serde(default)]
    pub return_date: Option<String>,

    #[serde(default)]
    pub airline_code: Option<String>,
    #[serde(default)]
    pub cabin: Option<Cabin>,
    #[serde(default)]
    pub purpose: Option<Purpose>,
}

/// Treat blank strings like missing values
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl TripContext {
    pub fn nationality(&self) -> Option<&str> {
        present(&self.nationality_country_code)
    }

    pub fn destination_country(&self) -> Option<&str> {
        present(&self.destination_country_code)
    }

    /// Fields a visa lookup needs but this profile lacks, in prompt wording
    pub fn missing_for_visa(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.nationality().is_none() {
            missing.push("passport country");
        }
        if self.destination_country().is_none() {
            missing.push("destination");
        }
        missing
    }

    /// Full profile block for the classifier
    pub fn classifier_block(&self) -> String {
        let or_unset = |v: Option<&str>| v.unwrap_or("Not specified").to_string();

        format!(
            "USER'S TRIP CONTEXT (use this to better understand their question):\n\
             - Nationality: {}\n\
             - Origin: {}\n\
             - Destination: {}\n\
             - Departure: {}\n\
             - Return: {}\n\
             - Trip Type: {}\n\
             - Purpose: {}\n\n\
             IMPORTANT: If the user has provided nationality and destination, questions about \
             \"do I need a visa\", \"entry requirements\", \"documents needed\" should trigger \
             needs_visa_api: true.",
            or_unset(self.nationality()),
            or_unset(present(&self.origin_city_or_airport)),
            or_unset(present(&self.destination_city_or_airport)),
            or_unset(present(&self.departure_date)),
            or_unset(present(&self.return_date)),
            or_unset(self.trip_type.as_ref().map(TripType::as_str)),
            or_unset(self.purpose.as_ref().map(Purpose::as_str)),
        )
    }

    /// Known trip details as bullet labels for the drafting persona
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(v) = self.nationality() {
            lines.push(format!("Passport: {}", v));
        }
        if let Some(v) = present(&self.origin_city_or_airport) {
            lines.push(format!("From: {}", v));
        }
        if let Some(v) = present(&self.destination_city_or_airport) {
            lines.push(format!("To: {}", v));
        }
        if let Some(v) = present(&self.departure_date) {
            lines.push(format!("Departure: {}", v));
        }
        if let Some(v) = present(&self.return_date) {
            lines.push(format!("Return: {}", v));
        }
        if let Some(v) = self.purpose {
            lines.push(format!("Purpose: {}", v.as_str()));
        }
        if let Some(v) = present(&self.airline_code) {
            lines.push(format!("Airline: {}", v));
        }
        lines
    }

    /// Short hint for the validator, `None` when nothing relevant is known
    pub fn validation_hint(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(v) = self.nationality() {
            parts.push(format!("Nationality: {}", v));
        }
        if let Some(v) = present(&self.destination_city_or_airport) {
            parts.push(format!("Destination: {}", v));
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!(
            "User's trip context: {}\nIf the question relates to their trip, the response should use this context.",
            parts.join(", ")
        ))
    }
}
