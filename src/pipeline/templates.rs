use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use crate::pipeline::presets::Preset;

/// Placeholder name to chosen value for one request.
pub type VariableBindings = BTreeMap<String, String>;

const STRICT_ADDENDUM_TEMPLATE: &str = "STRICT: This is for a game engine sprite. Output MUST be exactly {W}x{H} pixels. Create only the sprite artwork with clean edges. No gradients, glows, drop shadows, or padding around the character.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn compose(&self) -> String {
        compose_prompt(self.system.as_str(), self.user.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("preset '{preset_id}' needs a '{key}' binding for its strict retry prompt")]
    MissingStrictBinding { preset_id: String, key: &'static str },
}

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("Invalid placeholder regex"));

/// Substitutes every `{NAME}` with its binding, or the empty string when unbound.
///
/// Substituted values are never re-scanned, and braces that do not wrap an
/// identifier pass through untouched.
pub fn render(template: &str, bindings: &VariableBindings) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            bindings.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

pub fn render_preset(preset: &Preset, bindings: &VariableBindings) -> RenderedPrompt {
    RenderedPrompt {
        system: render(preset.system.as_str(), bindings),
        user: render(preset.user_template.as_str(), bindings),
    }
}

/// Renders the amendment appended to the prompt on a strict retry.
///
/// `W` and `H` must be bound explicitly. The preset's target size is not
/// consulted, so a caller that forgets them finds out before any call is made.
pub fn render_strict_addendum(
    preset: &Preset,
    bindings: &VariableBindings,
) -> Result<String, TemplateError> {
    for key in ["W", "H"] {
        let bound = bindings.get(key).is_some_and(|v| !v.trim().is_empty());
        if !bound {
            return Err(TemplateError::MissingStrictBinding {
                preset_id: preset.id.clone(),
                key,
            });
        }
    }
    Ok(render(STRICT_ADDENDUM_TEMPLATE, bindings))
}

pub fn compose_prompt(system: &str, user: &str) -> String {
    format!("{system}\n\n{user}")
}

/// Appends the strict addendum to an already composed prompt.
pub fn amend_prompt(prompt: &str, addendum: &str) -> String {
    format!("{prompt}\n\n{addendum}")
}
