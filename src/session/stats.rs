use serde::Serialize;

/// Per-session counters. Only the owning `Session` mutates them; everyone
/// else receives copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    chunks_received: u64,
    transcripts_sent: u64,
}

impl SessionStats {
    /// Every inbound message counts, audio or not.
    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    /// Final transcripts successfully handed to the transport.
    pub fn transcripts_sent(&self) -> u64 {
        self.transcripts_sent
    }

    /// Count one inbound message and return the new total.
    pub(super) fn record_chunk(&mut self) -> u64 {
        self.chunks_received += 1;
        self.chunks_received
    }

    pub(super) fn record_transcript(&mut self) {
        self.transcripts_sent += 1;
    }
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} chunks received, {} transcripts sent",
            self.chunks_received, self.transcripts_sent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero_and_grow() {
        let mut stats = SessionStats::default();
        assert_eq!(stats.chunks_received(), 0);
        assert_eq!(stats.record_chunk(), 1);
        assert_eq!(stats.record_chunk(), 2);
        stats.record_transcript();
        assert_eq!(stats.transcripts_sent(), 1);
        assert_eq!(stats.to_string(), "2 chunks received, 1 transcripts sent");
    }

    #[test]
    fn test_serializes_both_counters() {
        let mut stats = SessionStats::default();
        stats.record_chunk();
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["chunks_received"], 1);
        assert_eq!(json["transcripts_sent"], 0);
    }
}
