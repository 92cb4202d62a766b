//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for option '{option}': {value} not in {min}..={max}. {hint}")]
    Range {
        option: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    /// Option value that does not parse into the expected type
    #[error("Invalid value '{value}' for option '{option}': expected {expected}")]
    InvalidValue {
        option: String,
        value: String,
        expected: String,
    },

    /// Unknown option key
    #[error("Unknown option '{option}'. {suggestion}")]
    UnknownOption {
        option: String,
        suggestion: String,
        valid_options: Vec<String>,
    },

    /// Unknown backoff policy name
    #[error("Unknown backoff policy '{0}'. Valid policies: constantBackoff, exponentialBackoff, disable")]
    UnknownBackoffPolicy(String),

    /// Option refers to an attribute the table does not declare
    #[error("Invalid attribute name '{attribute}' found in {option}. No such attribute found in table definition.")]
    UnknownAttribute { option: String, attribute: String },

    /// Two options that select conflicting behaviour
    #[error("Options '{first}' and '{second}' cannot both be set. {hint}")]
    Conflict {
        first: String,
        second: String,
        hint: String,
    },

    /// Required option missing for the selected mode
    #[error("Missing option '{option}': {reason}")]
    Missing { option: String, reason: String },

    /// Malformed host / member list entry
    #[error("Malformed host url '{url}': {reason}")]
    MalformedUrl { url: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    /// Create a range error with a hint
    pub fn range_with_hint(
        option: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            option: option.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }

    pub fn invalid_value(
        option: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            option: option.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create an unknown option error with suggestion
    pub fn unknown_option_with_suggestion(option: impl Into<String>, valid_options: &[&str]) -> Self {
        let option = option.into();
        let valid_options: Vec<String> = valid_options.iter().map(|s| s.to_string()).collect();
        let suggestion = find_closest_match(&option, &valid_options);

        Self::UnknownOption {
            option,
            suggestion,
            valid_options,
        }
    }
}

/// Find closest match using simple edit distance
fn find_closest_match(target: &str, candidates: &[String]) -> String {
    match candidates
        .iter()
        .min_by_key(|candidate| levenshtein_distance(target, candidate))
    {
        Some(closest) => format!("Did you mean '{}'?", closest),
        None => "No valid options available".to_string(),
    }
}

/// Simple Levenshtein distance implementation
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let mut matrix = vec![vec![0; b.len() + 1]; a.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        matrix[0][j] = j;
    }

    for (i, c1) in a.iter().enumerate() {
        for (j, c2) in b.iter().enumerate() {
            let cost = if c1 == c2 { 0 } else { 1 };
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1) // deletion
                .min(matrix[i + 1][j] + 1) // insertion
                .min(matrix[i][j] + cost); // substitution
        }
    }

    matrix[a.len()][b.len()]
}
