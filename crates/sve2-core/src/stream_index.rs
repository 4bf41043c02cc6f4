// crates/sve2-core/src/stream_index.rs
//
// A stream reference is either an absolute index into a container or a
// (media kind, ordinal) pair resolved by scanning the container in order.
// Mirrors the reference's stream_index_t / stream_index_make_canonical.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

/// Either an absolute stream index, or a typed `(kind, ordinal)` reference
/// awaiting resolution against a container's stream list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIndex {
    Absolute(i32),
    Typed { kind: MediaKind, ordinal: i32 },
}

impl StreamIndex {
    pub fn absolute(index: i32) -> Self {
        StreamIndex::Absolute(index)
    }

    pub fn typed(kind: MediaKind, ordinal: i32) -> Self {
        StreamIndex::Typed { kind, ordinal }
    }

    /// Resolves against a list of `(absolute_index, kind)` pairs describing
    /// every stream in a container, in container order. Returns `None` if
    /// the index is out of range or no stream of the requested kind exists
    /// at the given ordinal.
    pub fn resolve(&self, streams: &[(i32, MediaKind)]) -> Option<i32> {
        match *self {
            StreamIndex::Absolute(idx) => {
                if streams.iter().any(|(i, _)| *i == idx) {
                    Some(idx)
                } else {
                    None
                }
            }
            StreamIndex::Typed { kind, ordinal } => {
                if ordinal < 0 {
                    return None;
                }
                streams
                    .iter()
                    .filter(|(_, k)| *k == kind)
                    .nth(ordinal as usize)
                    .map(|(i, _)| *i)
            }
        }
    }
}

impl fmt::Display for StreamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamIndex::Absolute(i) => write!(f, "#{i}"),
            StreamIndex::Typed { kind, ordinal } => {
                let c = match kind {
                    MediaKind::Video => 'v',
                    MediaKind::Audio => 'a',
                    MediaKind::Subtitle => 's',
                };
                write!(f, "{c}:{ordinal}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_streams() -> Vec<(i32, MediaKind)> {
        vec![
            (0, MediaKind::Video),
            (1, MediaKind::Audio),
            (2, MediaKind::Audio),
            (3, MediaKind::Subtitle),
        ]
    }

    #[test]
    fn absolute_index_checks_bounds() {
        let streams = sample_streams();
        assert_eq!(StreamIndex::absolute(1).resolve(&streams), Some(1));
        assert_eq!(StreamIndex::absolute(9).resolve(&streams), None);
    }

    #[test]
    fn typed_index_counts_only_matching_kind() {
        let streams = sample_streams();
        assert_eq!(StreamIndex::typed(MediaKind::Audio, 0).resolve(&streams), Some(1));
        assert_eq!(StreamIndex::typed(MediaKind::Audio, 1).resolve(&streams), Some(2));
        assert_eq!(StreamIndex::typed(MediaKind::Audio, 2).resolve(&streams), None);
        assert_eq!(StreamIndex::typed(MediaKind::Video, 0).resolve(&streams), Some(0));
    }

    #[test]
    fn negative_ordinal_never_resolves() {
        let streams = sample_streams();
        assert_eq!(StreamIndex::typed(MediaKind::Video, -1).resolve(&streams), None);
    }

    #[test]
    fn display_matches_reference_format() {
        assert_eq!(StreamIndex::typed(MediaKind::Video, 0).to_string(), "v:0");
        assert_eq!(StreamIndex::absolute(3).to_string(), "#3");
    }
}
