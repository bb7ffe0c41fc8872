use serde::de::{ self, Deserializer, Visitor };
use serde::{ Deserialize, Serialize };
use std::fmt;

use crate::error::ChatError;

pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);
pub const TOP_P_RANGE: (f64, f64) = (0.0, 1.0);
pub const TOP_K_RANGE: (u32, u32) = (1, 500);
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 32_768);

/// Generation knobs sent to Ollama as `options`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub temperature: f64,
    pub top_p: f64,
    #[serde(deserialize_with = "whole_number")]
    pub top_k: u32,
    #[serde(deserialize_with = "whole_number")]
    pub max_tokens: u32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 2000,
        }
    }
}

/// The `options` object of an Ollama request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OllamaOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_predict: u32,
}

impl Parameters {
    pub const NAMES: [&'static str; 4] = ["temperature", "top_p", "top_k", "max_tokens"];

    pub fn validate(&self) -> Result<(), ChatError> {
        check_float("temperature", self.temperature, TEMPERATURE_RANGE)?;
        check_float("top_p", self.top_p, TOP_P_RANGE)?;
        check_int("top_k", self.top_k, TOP_K_RANGE)?;
        check_int("max_tokens", self.max_tokens, MAX_TOKENS_RANGE)?;
        Ok(())
    }

    /// Parses `value` and assigns it to the named parameter. The existing
    /// value is untouched when parsing or range checking fails.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ChatError> {
        let value = value.trim();
        match name.to_lowercase().as_str() {
            "temperature" | "temp" => {
                let v = parse_float(name, value)?;
                check_float("temperature", v, TEMPERATURE_RANGE)?;
                self.temperature = v;
            }
            "top_p" => {
                let v = parse_float(name, value)?;
                check_float("top_p", v, TOP_P_RANGE)?;
                self.top_p = v;
            }
            "top_k" => {
                let v = parse_int(name, value)?;
                check_int("top_k", v, TOP_K_RANGE)?;
                self.top_k = v;
            }
            "max_tokens" | "num_predict" => {
                let v = parse_int(name, value)?;
                check_int("max_tokens", v, MAX_TOKENS_RANGE)?;
                self.max_tokens = v;
            }
            _ => {
                return Err(
                    ChatError::Validation(
                        format!(
                            "unknown parameter '{}' (expected one of: {})",
                            name,
                            Self::NAMES.join(", ")
                        )
                    )
                );
            }
        }
        Ok(())
    }

    pub fn to_options(&self) -> OllamaOptions {
        OllamaOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            num_predict: self.max_tokens,
        }
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temperature={:.2} top_p={:.2} top_k={} max_tokens={}",
            self.temperature,
            self.top_p,
            self.top_k,
            self.max_tokens
        )
    }
}

fn parse_float(name: &str, value: &str) -> Result<f64, ChatError> {
    value
        .parse::<f64>()
        .map_err(|_| ChatError::Validation(format!("invalid value for {}: '{}'", name, value)))
}

fn parse_int(name: &str, value: &str) -> Result<u32, ChatError> {
    value
        .parse::<u32>()
        .map_err(|_| ChatError::Validation(format!("invalid value for {}: '{}'", name, value)))
}

/// Accepts `40` as well as `40.0`; older saves wrote every parameter as a float.
fn whole_number<'de, D>(deserializer: D) -> Result<u32, D::Error> where D: Deserializer<'de> {
    struct WholeNumber;

    impl<'de> Visitor<'de> for WholeNumber {
        type Value = u32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative whole number")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("{} is too large", v)))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(|_| E::custom(format!("{} is out of range", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u32, E> {
            if v.is_finite() && v.fract() == 0.0 && v >= 0.0 && v <= (u32::MAX as f64) {
                Ok(v as u32)
            } else {
                Err(E::custom(format!("{} is not a whole number", v)))
            }
        }
    }

    deserializer.deserialize_any(WholeNumber)
}

fn check_float(name: &str, value: f64, (min, max): (f64, f64)) -> Result<(), ChatError> {
    if !value.is_finite() || value < min || value > max {
        return Err(
            ChatError::Validation(format!("{} must be between {} and {}, got {}", name, min, max, value))
        );
    }
    Ok(())
}

fn check_int(name: &str, value: u32, (min, max): (u32, u32)) -> Result<(), ChatError> {
    if value < min || value > max {
        return Err(
            ChatError::Validation(format!("{} must be between {} and {}, got {}", name, min, max, value))
        );
    }
    Ok(())
}
