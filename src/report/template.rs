//! Placeholder substitution shared by every report template.

use regex::Regex;

/// How a placeholder is spelled around its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle<'a> {
    /// `__name__`
    Delimited,
    /// `name` followed by a suffix, e.g. `Vbp_V`.
    Suffixed(&'a str),
}

impl PlaceholderStyle<'_> {
    pub fn placeholder(&self, name: &str) -> String {
        match self {
            Self::Delimited => format!("__{}__", name),
            Self::Suffixed(suffix) => format!("{}{}", name, suffix),
        }
    }
}

/// Replace every placeholder in `text` with its rendered value.
///
/// All placeholders are matched in a single pass, longest first, so a
/// value never gets substituted again and `Vo_V` cannot clobber `Vo+_V`.
pub fn render(text: &str, style: PlaceholderStyle<'_>, values: &[(String, String)]) -> String {
    if values.is_empty() {
        return text.to_string();
    }

    let mut keyed: Vec<(String, &str)> = values
        .iter()
        .map(|(name, value)| (style.placeholder(name), value.as_str()))
        .collect();
    keyed.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let pattern = keyed
        .iter()
        .map(|(p, _)| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(re) = Regex::new(&pattern) else {
        return text.to_string();
    };

    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let hit = &caps[0];
        keyed
            .iter()
            .find(|(p, _)| p == hit)
            .map(|(_, v)| v.to_string())
            .unwrap_or_else(|| hit.to_string())
    })
    .into_owned()
}

/// Format numeric values with a fixed precision and optional unit.
pub fn numeric<'a, I>(values: I, precision: usize, unit: &str) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    values
        .into_iter()
        .map(|(name, v)| {
            let text = if unit.is_empty() {
                format!("{:.*}", precision, v)
            } else {
                format!("{:.*} {}", precision, v, unit)
            };
            (name.to_string(), text)
        })
        .collect()
}
