//! Path expressions addressing a location inside a resource.
//!
//! A path is a dot-separated list of segments:
//!
//! - `$` - the root marker, skipped
//! - `name` - drill into (or create) an object under `name`
//! - `name[0]` / `name[use=official]` - drill into an array under `name`
//! - `[0]` / `[use=official]` - operate on the current value as an array
//!
//! Dots inside a bracketed qualifier do not split segments, so
//! `identifier[system=http://loinc.org].value` has two segments.

use std::fmt;

use crate::error::AssemblyError;

/// Root marker accepted as a leading segment.
pub const ROOT_MARKER: &str = "$";

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// The raw path string
    pub raw: String,
    /// Parsed path segments
    pub segments: Vec<PathSegment>,
}

/// A segment in a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `$`
    Root,
    /// A bare key (e.g. `name`, `Patient`)
    Key(String),
    /// A key followed by a qualifier (e.g. `name[0]`)
    Keyed { key: String, qualifier: Qualifier },
    /// A qualifier with no key (e.g. `[0]`)
    Qualified(Qualifier),
}

/// Narrows an array segment to a single element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualifier {
    /// `[3]`
    Index(usize),
    /// `[name=value]` - the first element whose `name` equals `value`
    Equals { name: String, value: String },
}

impl FieldPath {
    /// Parse a dot-separated path expression.
    ///
    /// All syntax checks happen here, so a malformed path is rejected before
    /// anything is written.
    ///
    /// # Example
    ///
    /// ```
    /// use cohort_bundler::path::{FieldPath, PathSegment, Qualifier};
    ///
    /// let path = FieldPath::parse("Patient.name[use=official].family").unwrap();
    /// assert_eq!(path.segments.len(), 3);
    /// assert_eq!(
    ///     path.segments[1],
    ///     PathSegment::Keyed {
    ///         key: "name".to_string(),
    ///         qualifier: Qualifier::Equals {
    ///             name: "use".to_string(),
    ///             value: "official".to_string(),
    ///         },
    ///     }
    /// );
    /// ```
    pub fn parse(path: &str) -> Result<Self, AssemblyError> {
        let segments = split_segments(path)?
            .into_iter()
            .map(|text| parse_segment(path, text))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// The text of the last dot-separated segment, without its qualifier.
    ///
    /// Custom handlers receive this as the key they are asked to fill.
    pub fn leaf_key(&self) -> &str {
        match self.segments.last() {
            Some(PathSegment::Key(key)) | Some(PathSegment::Keyed { key, .. }) => key,
            _ => "",
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Root => write!(f, "{}", ROOT_MARKER),
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Keyed { key, qualifier } => write!(f, "{}[{}]", key, qualifier),
            PathSegment::Qualified(qualifier) => write!(f, "[{}]", qualifier),
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Index(index) => write!(f, "{}", index),
            Qualifier::Equals { name, value } => write!(f, "{}={}", name, value),
        }
    }
}

/// Return the last dot-separated segment of a raw path, bracket-aware.
///
/// Works on paths the grammar would reject (handler paths such as
/// `extension[Race].ombCategory` use free-form qualifiers).
pub fn raw_leaf(path: &str) -> &str {
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in path.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => start = i + 1,
            _ => {}
        }
    }
    let leaf = &path[start..];
    leaf.split('[').next().unwrap_or(leaf)
}

/// Split on dots that are outside brackets, checking bracket balance.
fn split_segments(path: &str) -> Result<Vec<&str>, AssemblyError> {
    if path.trim().is_empty() {
        return Err(AssemblyError::syntax(path, "empty path"));
    }

    let mut segments = Vec::new();
    let mut open = false;
    let mut start = 0;

    for (i, ch) in path.char_indices() {
        match ch {
            '[' if open => return Err(AssemblyError::syntax(path, "nested '['")),
            '[' => open = true,
            ']' if !open => return Err(AssemblyError::syntax(path, "unmatched ']'")),
            ']' => open = false,
            '.' if !open => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if open {
        return Err(AssemblyError::syntax(path, "unbalanced '['"));
    }
    segments.push(&path[start..]);

    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(AssemblyError::syntax(path, "empty segment"));
    }
    Ok(segments)
}

fn parse_segment(path: &str, text: &str) -> Result<PathSegment, AssemblyError> {
    let text = text.trim();
    if text == ROOT_MARKER {
        return Ok(PathSegment::Root);
    }

    let Some(open) = text.find('[') else {
        return Ok(PathSegment::Key(text.to_string()));
    };

    // split_segments guarantees a matching ']' follows
    let close = text.rfind(']').unwrap_or(text.len());
    if close + 1 != text.len() {
        return Err(AssemblyError::syntax(
            path,
            format!("unexpected text after qualifier in '{}'", text),
        ));
    }

    let inner = &text[open + 1..close];
    if inner.contains(|c: char| c == '[' || c == ']') {
        return Err(AssemblyError::syntax(
            path,
            format!("only one qualifier is allowed per segment in '{}'", text),
        ));
    }

    let key = text[..open].trim();
    let qualifier = parse_qualifier(path, inner)?;

    if key.is_empty() {
        Ok(PathSegment::Qualified(qualifier))
    } else {
        Ok(PathSegment::Keyed {
            key: key.to_string(),
            qualifier,
        })
    }
}

fn parse_qualifier(path: &str, text: &str) -> Result<Qualifier, AssemblyError> {
    if let Some((name, value)) = text.split_once('=') {
        let name = name.trim();
        if name.is_empty() {
            return Err(AssemblyError::syntax(path, "qualifier condition has no field name"));
        }
        return Ok(Qualifier::Equals {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
    }

    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AssemblyError::syntax(
            path,
            format!("qualifier '{}' is neither an index nor a name=value condition", text),
        ));
    }
    text.parse::<usize>()
        .map(Qualifier::Index)
        .map_err(|_| AssemblyError::syntax(path, format!("index '{}' out of range", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_keys() {
        let path = FieldPath::parse("Patient.name.family").unwrap();

        assert_eq!(path.segments.len(), 3);
        assert_eq!(path.segments[0], PathSegment::Key("Patient".to_string()));
        assert_eq!(path.segments[2], PathSegment::Key("family".to_string()));
        assert_eq!(path.leaf_key(), "family");
    }

    #[test]
    fn test_parse_standalone_index() {
        let path = FieldPath::parse("$.identifier.[0].value").unwrap();

        assert_eq!(path.segments.len(), 4);
        assert_eq!(path.segments[0], PathSegment::Root);
        assert_eq!(path.segments[2], PathSegment::Qualified(Qualifier::Index(0)));
    }

    #[test]
    fn test_parse_keyed_index() {
        let path = FieldPath::parse("name[2].use").unwrap();

        assert_eq!(
            path.segments[0],
            PathSegment::Keyed {
                key: "name".to_string(),
                qualifier: Qualifier::Index(2),
            }
        );
    }

    #[test]
    fn test_dots_inside_qualifier_do_not_split() {
        let path = FieldPath::parse("identifier[system=http://hl7.org/fhir/sid/us-npi].value").unwrap();

        assert_eq!(path.segments.len(), 2);
        assert_eq!(
            path.segments[0],
            PathSegment::Keyed {
                key: "identifier".to_string(),
                qualifier: Qualifier::Equals {
                    name: "system".to_string(),
                    value: "http://hl7.org/fhir/sid/us-npi".to_string(),
                },
            }
        );
    }

    #[test]
    fn test_unbalanced_brackets_rejected() {
        for bad in [
            "name[0.family",
            "name0].family",
            "name[[0]]",
            "name[0]x.family",
            "Patient.name[use=official][0].family",
            "identifier[0][1]",
        ] {
            let err = FieldPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, AssemblyError::PathSyntax { .. }),
                "expected syntax error for {}",
                bad
            );
        }
    }

    #[test]
    fn test_non_numeric_index_rejected() {
        for bad in ["name[-1]", "extension[Race].ombCategory", "name[].family", "name[1.5]"] {
            assert!(FieldPath::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("name..family").is_err());
        assert!(FieldPath::parse("name.").is_err());
    }

    #[test]
    fn test_display_round_trips_segments() {
        let path = FieldPath::parse("name[use=official].given").unwrap();
        let rendered: Vec<String> = path.segments.iter().map(|s| s.to_string()).collect();
        assert_eq!(rendered, vec!["name[use=official]", "given"]);
    }

    #[test]
    fn test_raw_leaf() {
        assert_eq!(raw_leaf("Patient.extension[Race].ombCategory"), "ombCategory");
        assert_eq!(raw_leaf("Organization.identifier[system=NPI].value"), "value");
        assert_eq!(raw_leaf("identifier[system=http://x.org/a.b]"), "identifier");
    }
}
