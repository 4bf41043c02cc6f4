// crates/sve2-core/src/packet.rs
//
// The message carried on a demuxer's per-stream packet channel.
//
// The reference encodes this as a struct with bitflags (regular / error /
// eof / seek) and a packet pointer that is only meaningful for the regular
// case. Re-expressed here as a sum type with exactly one variant per state
// and a payload only where one exists (see the redesign note on tagged
// messages over channels) — decoder and media-source dispatch become total
// matches instead of flag checks.

/// One message on a stream's packet channel. `T` is the concrete packet
/// payload type (kept generic so sve2-core has no FFmpeg dependency).
#[derive(Debug, Clone)]
pub enum PacketMessage<T> {
    /// An ordinary container packet belonging to this stream.
    Regular(T),
    /// "The packets after me belong to the new position; flush your decoder."
    /// Exactly one of these is interposed between the seek command and the
    /// first regular packet at the new position.
    SeekMarker,
    /// Natural end of the container; terminal for this channel.
    Eof,
    /// A container read failed; terminal for this channel.
    Error,
}

impl<T> PacketMessage<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PacketMessage::Eof | PacketMessage::Error)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, PacketMessage::Regular(_))
    }

    pub fn into_regular(self) -> Option<T> {
        match self {
            PacketMessage::Regular(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(PacketMessage::<()>::Eof.is_terminal());
        assert!(PacketMessage::<()>::Error.is_terminal());
        assert!(!PacketMessage::<()>::SeekMarker.is_terminal());
        assert!(!PacketMessage::Regular(1).is_terminal());
    }

    #[test]
    fn into_regular_only_unwraps_regular() {
        assert_eq!(PacketMessage::Regular(42).into_regular(), Some(42));
        assert_eq!(PacketMessage::<i32>::SeekMarker.into_regular(), None);
    }
}
