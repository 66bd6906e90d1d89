//! Core value types for the manifest archive.

/// A downloaded manifest descriptor, ready to be archived.
///
/// The `manifest` bytes are the upstream CDN's serialization and are treated
/// as an opaque payload keyed by `(depot_id, manifest_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub app_id: u32,
    pub depot_id: u32,
    pub manifest_id: u64,
    pub depot_key: [u8; 32],
    pub manifest: Vec<u8>,
}

impl ManifestRecord {
    /// The branch this record is archived on.
    pub fn branch_name(&self) -> String {
        self.app_id.to_string()
    }

    /// The blob name on the app branch: `{depot}_{manifest}.manifest`.
    pub fn manifest_file_name(&self) -> String {
        format!("{}_{}.manifest", self.depot_id, self.manifest_id)
    }

    /// The tag pinning this record: `{app}_{depot}_{manifest}`.
    pub fn tag_name(&self) -> String {
        TagTriple {
            app_id: self.app_id,
            depot_id: self.depot_id,
            manifest_id: self.manifest_id,
        }
        .to_string()
    }
}

/// The `(app, depot, manifest)` triple encoded in a tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagTriple {
    pub app_id: u32,
    pub depot_id: u32,
    pub manifest_id: u64,
}

impl TagTriple {
    /// Parse a tag name of the shape `{app}_{depot}_{manifest}`.
    ///
    /// Returns `None` for tags that do not follow the scheme; the archive
    /// ignores such tags rather than failing.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('_');
        let app_id = parts.next()?.parse().ok()?;
        let depot_id = parts.next()?.parse().ok()?;
        let manifest_id = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            app_id,
            depot_id,
            manifest_id,
        })
    }
}

impl std::fmt::Display for TagTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.app_id, self.depot_id, self.manifest_id)
    }
}

/// Result of an archive write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new commit was created and pushed, and the tag now points at it
    Written,
    /// The staged tree matched the branch tip; no commit was created
    Unchanged,
    /// The tag already existed; the write was skipped entirely
    AlreadyPresent,
}

impl WriteOutcome {
    /// Whether the write produced a new commit.
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_triple_parse() {
        assert_eq!(
            TagTriple::parse("10_20_42"),
            Some(TagTriple {
                app_id: 10,
                depot_id: 20,
                manifest_id: 42
            })
        );
        assert_eq!(TagTriple::parse("10_20"), None);
        assert_eq!(TagTriple::parse("10_20_42_7"), None);
        assert_eq!(TagTriple::parse("v1.2.3"), None);
        assert_eq!(TagTriple::parse("10_x_42"), None);
        assert_eq!(TagTriple::parse(""), None);
    }

    #[test]
    fn test_tag_triple_display_roundtrip() {
        let triple = TagTriple {
            app_id: 730,
            depot_id: 731,
            manifest_id: 7617088375292372759,
        };
        assert_eq!(TagTriple::parse(&triple.to_string()), Some(triple));
    }

    #[test]
    fn test_record_names() {
        let record = ManifestRecord {
            app_id: 10,
            depot_id: 20,
            manifest_id: 42,
            depot_key: [0; 32],
            manifest: vec![],
        };
        assert_eq!(record.branch_name(), "10");
        assert_eq!(record.manifest_file_name(), "20_42.manifest");
        assert_eq!(record.tag_name(), "10_20_42");
    }
}
