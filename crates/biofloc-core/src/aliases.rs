// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Biofloc Monitor.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What to do when two raw sensor keys normalize to the same canonical name
/// within one document (e.g. both `temp` and `temperatura`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasCollisionPolicy {
    /// Keep the value seen first in document order, discard later duplicates
    #[default]
    FirstWins,
    /// Let later duplicates overwrite the earlier value
    LastWins,
}

/// Mapping from raw sensor names (any casing, any language) to canonical names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorAliases {
    aliases: HashMap<String, String>,
}

const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("temperatura", "temperature"),
    ("temp", "temperature"),
    ("ph", "ph"),
    ("oxygen", "oxygen"),
    ("oxigeno", "oxygen"),
    ("oxígeno", "oxygen"),
    ("do", "oxygen"),
    ("od", "oxygen"),
    ("dissolved_oxygen", "oxygen"),
    ("humidity", "humidity"),
    ("humedad", "humidity"),
    ("amonio", "ammonia"),
    ("nitrito", "nitrite"),
    ("nitrato", "nitrate"),
    ("salinidad", "salinity"),
];

impl Default for SensorAliases {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SensorAliases {
    /// No aliasing: names are only lower-cased and trimmed
    pub fn empty() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        BUILTIN_ALIASES
            .iter()
            .fold(Self::empty(), |acc, (alias, canonical)| {
                acc.with_alias(alias, canonical)
            })
    }

    #[must_use]
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases
            .insert(alias.trim().to_lowercase(), canonical.to_owned());
        self
    }

    /// Lower-case, trim, then map known aliases to their canonical name
    pub fn canonicalize(&self, raw: &str) -> String {
        let key = raw.trim().to_lowercase();
        match self.aliases.get(&key) {
            Some(canonical) => canonical.clone(),
            None => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_aliases() {
        let aliases = SensorAliases::builtin();
        assert_eq!(aliases.canonicalize("TEMP"), "temperature");
        assert_eq!(aliases.canonicalize(" Temperatura "), "temperature");
        assert_eq!(aliases.canonicalize("DO"), "oxygen");
        assert_eq!(aliases.canonicalize("oxigeno"), "oxygen");
        assert_eq!(aliases.canonicalize("Ph"), "ph");
    }

    #[test]
    fn test_unknown_names_are_only_cleaned() {
        let aliases = SensorAliases::builtin();
        assert_eq!(aliases.canonicalize("  Turbidity"), "turbidity");
        assert_eq!(SensorAliases::empty().canonicalize("TEMP"), "temp");
    }

    #[test]
    fn test_policy_serialization() {
        let policy: AliasCollisionPolicy = serde_json::from_str("\"last_wins\"").unwrap();
        assert_eq!(policy, AliasCollisionPolicy::LastWins);
        assert_eq!(AliasCollisionPolicy::default(), AliasCollisionPolicy::FirstWins);
    }
}
