//! Generation settings exposed to the user.
//!
//! The descriptor list is static for the process lifetime; only the set
//! of selectable models changes, and that comes from the remote model
//! list intersected with [`SUPPORTED_MODELS`].

use serde::Serialize;

/// Models the client is willing to offer, in display order. The model
/// selector only ever shows entries from this list that the remote
/// `/v1/models` endpoint also reports as available.
pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
];

/// Widget kind for a settings field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettingKind {
    /// Free numeric input with widget-enforced bounds.
    Number { min: f64, max: f64, step: f64 },
    /// Fixed choice list.
    Select { options: &'static [&'static str] },
}

/// One configurable generation parameter.
#[derive(Debug, Clone, Serialize)]
pub struct SettingDescriptor {
    /// Request-body field name.
    pub key: &'static str,
    /// Short label shown next to the widget.
    pub label: &'static str,
    /// Longer tooltip text.
    pub title: &'static str,
    /// Placeholder shown for an empty field (the API-side default).
    pub default: &'static str,
    /// Widget kind and bounds.
    pub kind: SettingKind,
}

/// The full descriptor list. Fields left empty by the user are omitted
/// from the composed request, so every default here is advisory only.
pub const fn descriptors() -> &'static [SettingDescriptor] {
    DESCRIPTORS
}

const DESCRIPTORS: &[SettingDescriptor] = &[
    SettingDescriptor {
        key: "model",
        label: "Model",
        title: "Which model answers the conversation.",
        default: "gpt-3.5-turbo",
        kind: SettingKind::Select {
            options: SUPPORTED_MODELS,
        },
    },
    SettingDescriptor {
        key: "temperature",
        label: "Temperature",
        title: "Sampling temperature. Higher values make output more random.",
        default: "1",
        kind: SettingKind::Number {
            min: 0.0,
            max: 2.0,
            step: 0.1,
        },
    },
    SettingDescriptor {
        key: "top_p",
        label: "Top P",
        title: "Nucleus sampling mass. Alternative to temperature.",
        default: "1",
        kind: SettingKind::Number {
            min: 0.0,
            max: 1.0,
            step: 0.05,
        },
    },
    SettingDescriptor {
        key: "max_tokens",
        label: "Max tokens",
        title: "Upper bound on generated tokens per reply.",
        default: "",
        kind: SettingKind::Number {
            min: 1.0,
            max: 32768.0,
            step: 1.0,
        },
    },
    SettingDescriptor {
        key: "presence_penalty",
        label: "Presence penalty",
        title: "Penalizes tokens that already appeared, encouraging new topics.",
        default: "0",
        kind: SettingKind::Number {
            min: -2.0,
            max: 2.0,
            step: 0.1,
        },
    },
    SettingDescriptor {
        key: "frequency_penalty",
        label: "Frequency penalty",
        title: "Penalizes tokens proportionally to how often they appeared.",
        default: "0",
        kind: SettingKind::Number {
            min: -2.0,
            max: 2.0,
            step: 0.1,
        },
    },
];

/// Intersect the remote model list with the allow-list, preserving
/// allow-list order. The selector never offers a model that is either
/// unsupported or unavailable.
pub fn supported_models(available: &[String]) -> Vec<String> {
    SUPPORTED_MODELS
        .iter()
        .filter(|m| available.iter().any(|a| a.as_str() == **m))
        .map(|m| (*m).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_keys_are_unique() {
        let mut keys: Vec<_> = descriptors().iter().map(|d| d.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), descriptors().len());
    }

    #[test]
    fn intersection_preserves_allow_list_order() {
        let available = vec![
            "gpt-3.5-turbo".to_string(),
            "text-davinci-003".to_string(),
            "gpt-4o".to_string(),
        ];
        let models = supported_models(&available);
        assert_eq!(models, vec!["gpt-4o", "gpt-3.5-turbo"]);
    }

    #[test]
    fn intersection_drops_unavailable_models() {
        let models = supported_models(&[]);
        assert!(models.is_empty());
    }
}
