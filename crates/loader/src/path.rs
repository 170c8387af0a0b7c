//! Field paths over JSON documents.
//!
//! Reference paths are declared with bracket array syntax (`contact[0].organization`),
//! while the document store addresses array elements with numeric dotted segments
//! (`contact.0.organization`). [`FieldPath`] parses either form into an explicit list
//! of [`Segment`]s and renders the store-native dotted form through `Display`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::PathError;

/// A single step in a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// An object member.
    Key(String),
    /// An array element.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// An ordered sequence of segments addressing a value inside a document.
///
/// # Examples
///
/// ```
/// use helios_loader::path::{FieldPath, Segment};
/// use serde_json::json;
///
/// let path = FieldPath::parse("generalPractitioner[0].identifier").unwrap();
/// assert_eq!(path.to_string(), "generalPractitioner.0.identifier");
/// assert_eq!(path.segments()[1], Segment::Index(0));
///
/// let doc = json!({"generalPractitioner": [{"identifier": {"value": "123"}}]});
/// assert_eq!(path.get(&doc).unwrap()["value"], "123");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Parses a path in bracket (`a[0].b`) or dotted-numeric (`a.0.b`) syntax.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let malformed = |message: &str| PathError::Malformed {
            path: path.to_string(),
            message: message.to_string(),
        };

        if path.is_empty() {
            return Err(malformed("empty path"));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            if part.is_empty() {
                return Err(malformed("empty segment"));
            }

            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if name.contains(']') {
                return Err(malformed("unexpected ']'"));
            }
            if !name.is_empty() {
                if name.bytes().all(|b| b.is_ascii_digit()) {
                    let index = name
                        .parse::<usize>()
                        .map_err(|_| malformed("array index out of range"))?;
                    segments.push(Segment::Index(index));
                } else {
                    segments.push(Segment::Key(name.to_string()));
                }
            }

            while !rest.is_empty() {
                let Some(inner) = rest.strip_prefix('[') else {
                    return Err(malformed("expected '[' after ']'"));
                };
                let Some(close) = inner.find(']') else {
                    return Err(malformed("unclosed '['"));
                };
                let index = inner[..close]
                    .parse::<usize>()
                    .map_err(|_| malformed("invalid array index"))?;
                segments.push(Segment::Index(index));
                rest = &inner[close + 1..];
            }
        }

        Ok(Self { segments })
    }

    /// Builds a path from explicit segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Returns the segments of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns true if the path addresses the document root.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `other` appended.
    pub fn join(&self, other: &FieldPath) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        FieldPath { segments }
    }

    /// Returns a new path with an object member appended.
    pub fn child(&self, key: impl Into<String>) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.push(Segment::Key(key.into()));
        FieldPath { segments }
    }

    /// Returns the value addressed by this path.
    pub fn get<'a>(&self, document: &'a Value) -> Result<&'a Value, PathError> {
        let mut current = document;
        for segment in &self.segments {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            };
            current = next.ok_or_else(|| self.not_found(segment))?;
        }
        Ok(current)
    }

    /// Returns a mutable reference to the value addressed by this path.
    pub fn get_mut<'a>(&self, document: &'a mut Value) -> Result<&'a mut Value, PathError> {
        let mut current = document;
        for segment in &self.segments {
            let next = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key),
                (Segment::Index(index), Value::Array(items)) => items.get_mut(*index),
                _ => None,
            };
            current = next.ok_or_else(|| self.not_found(segment))?;
        }
        Ok(current)
    }

    /// Replaces the value addressed by this path.
    ///
    /// Every intermediate segment must exist. A final key segment is inserted into
    /// its parent object if missing; a final index segment must already exist.
    pub fn set(&self, document: &mut Value, value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *document = value;
            return Ok(());
        };

        let mut parent = document;
        for segment in parents {
            let next = match (segment, parent) {
                (Segment::Key(key), Value::Object(map)) => map.get_mut(key),
                (Segment::Index(index), Value::Array(items)) => items.get_mut(*index),
                _ => None,
            };
            parent = next.ok_or_else(|| self.not_found(segment))?;
        }

        match (last, parent) {
            (Segment::Key(key), Value::Object(map)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (Segment::Index(index), Value::Array(items)) if *index < items.len() => {
                items[*index] = value;
                Ok(())
            }
            _ => Err(self.not_found(last)),
        }
    }

    fn not_found(&self, segment: &Segment) -> PathError {
        PathError::NotFound {
            path: self.to_string(),
            segment: segment.to_string(),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}
