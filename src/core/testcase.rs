use crate::core::model::ResolvedMedia;
use regex::Regex;

/// What a test case expects a resolved field to look like.
#[derive(Debug, Clone, Copy)]
pub enum Expected {
    /// Exact string (numbers are compared through their display form).
    Text(&'static str),
    /// Regular expression the whole field value must match.
    Re(&'static str),
}

impl Expected {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Expected::Text(want) => *want == value,
            Expected::Re(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
        }
    }
}

/// Declarative fixture attached to a resolver: documents a known-good URL
/// and what resolving it should yield. Consumed only by verification
/// tooling, never at resolution time.
#[derive(Debug, Clone, Copy)]
pub struct TestCase {
    pub url: &'static str,
    /// Expected media id, when the case is more than a pattern check.
    pub id: Option<&'static str>,
    /// Checksum of the first ten KiB of the downloaded media, for external
    /// download-verification tooling. Nothing in this crate computes it.
    pub md5: Option<&'static str>,
    pub fields: &'static [(&'static str, Expected)],
    /// The URL only documents pattern coverage; resolving it is not part
    /// of the fixture.
    pub only_matching: bool,
    pub skip: Option<&'static str>,
}

impl TestCase {
    pub const fn new(url: &'static str) -> Self {
        Self { url, id: None, md5: None, fields: &[], only_matching: false, skip: None }
    }

    pub const fn only_matching(url: &'static str) -> Self {
        Self { url, id: None, md5: None, fields: &[], only_matching: true, skip: None }
    }

    /// Compare a resolution result against the expectations; returns one
    /// message per mismatch.
    pub fn check(&self, media: &ResolvedMedia) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(id) = self.id {
            if media.id() != id {
                problems.push(format!("id: expected {:?}, got {:?}", id, media.id()));
            }
        }
        for (name, expected) in self.fields {
            match field_value(media, name) {
                Some(value) if expected.matches(&value) => {}
                Some(value) => {
                    problems.push(format!("{name}: {expected:?} does not match {value:?}"))
                }
                None => problems.push(format!("{name}: missing from result")),
            }
        }
        problems
    }
}

fn field_value(media: &ResolvedMedia, name: &str) -> Option<String> {
    match name {
        "id" => Some(media.id().to_string()),
        "title" => Some(media.title().to_string()),
        "duration" => match media {
            ResolvedMedia::Single(item) => item.duration_seconds.map(|d| d.to_string()),
            ResolvedMedia::Collection(_) => None,
        },
        _ => None,
    }
}
