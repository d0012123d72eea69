//! Built-in catalog of named query templates, grouped into packs selected by a
//! dataset name/kind substring filter, with `{{dataset}}`/`{{range}}` placeholder
//! substitution.

use crate::compiler::Format;

/// A single named template.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub format: Format,
    /// Substrings of a dataset's name/kind that make this preset applicable; `None`
    /// means the Core pack, always applicable.
    pub kind_filter: Option<&'static [&'static str]>,
    pub body: &'static str,
}

const CORE: &[Preset] = &[
    Preset {
        name: "recent",
        description: "Most recent rows in the default range",
        format: Format::Ndjson,
        kind_filter: None,
        body: "['{{dataset}}']\n| where _time between (ago({{range}}) .. now())\n| take 100",
    },
    Preset {
        name: "error-rate",
        description: "Share of rows with an error-like status field",
        format: Format::Csv,
        kind_filter: None,
        body: "['{{dataset}}']\n| where _time between (ago({{range}}) .. now())\n| summarize count() by status",
    },
];

const OTEL: &[Preset] = &[Preset {
    name: "slow-spans",
    description: "Spans over 1s in the default range",
    format: Format::Ndjson,
    kind_filter: Some(&["otel", "trace", "span"]),
    body: "['{{dataset}}']\n| where _time between (ago({{range}}) .. now())\n| where duration > 1s\n| take 100",
}];

const STRIPE: &[Preset] = &[Preset {
    name: "failed-charges",
    description: "Failed charge events in the default range",
    format: Format::Ndjson,
    kind_filter: Some(&["stripe", "payment", "charge"]),
    body: "['{{dataset}}']\n| where _time between (ago({{range}}) .. now())\n| where type == \"charge.failed\"\n| take 100",
}];

const SEGMENT: &[Preset] = &[Preset {
    name: "top-events",
    description: "Most common event names in the default range",
    format: Format::Csv,
    kind_filter: Some(&["segment", "track", "event"]),
    body: "['{{dataset}}']\n| where _time between (ago({{range}}) .. now())\n| summarize count() by event",
}];

fn all_packs() -> impl Iterator<Item = &'static Preset> {
    CORE.iter().chain(OTEL.iter()).chain(STRIPE.iter()).chain(SEGMENT.iter())
}

/// All presets in the catalog, root-level `/_presets/` listing.
pub fn catalog() -> Vec<&'static Preset> {
    all_packs().collect()
}

pub fn find(name: &str) -> Option<&'static Preset> {
    all_packs().find(|p| p.name == name)
}

/// Presets applicable to a dataset whose name or kind contains one of a pack's filter
/// substrings (Core always applies).
pub fn for_dataset(dataset_name: &str, dataset_kind: Option<&str>) -> Vec<&'static Preset> {
    let haystack = format!("{} {}", dataset_name.to_lowercase(), dataset_kind.unwrap_or("").to_lowercase());
    all_packs()
        .filter(|preset| match preset.kind_filter {
            None => true,
            Some(needles) => needles.iter().any(|needle| haystack.contains(needle)),
        })
        .collect()
}

/// Renders a preset's body by substituting `{{dataset}}` and `{{range}}`.
pub fn render(preset: &Preset, dataset: &str, range: &str) -> String {
    preset.body.replace("{{dataset}}", dataset).replace("{{range}}", range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_presets_apply_to_every_dataset() {
        let presets = for_dataset("anything", None);
        assert!(presets.iter().any(|p| p.name == "recent"));
    }

    #[test]
    fn otel_presets_only_apply_to_matching_datasets() {
        let presets = for_dataset("otel-traces", None);
        assert!(presets.iter().any(|p| p.name == "slow-spans"));
        let presets = for_dataset("billing", None);
        assert!(!presets.iter().any(|p| p.name == "slow-spans"));
    }

    #[test]
    fn render_substitutes_placeholders() {
        let preset = find("recent").unwrap();
        let rendered = render(preset, "logs", "1h");
        assert!(rendered.contains("['logs']"));
        assert!(rendered.contains("ago(1h)"));
    }
}
