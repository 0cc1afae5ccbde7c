//! Incremental trigger matching
//!
//! Matches a stream of transcription events against a dynamic candidate
//! set. Matching state carries the consumed-word index forward across
//! re-transcriptions of the same utterance, so a trigger that already
//! fired is not fired again while the recognizer keeps appending words.

use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::speech::normalize::{normalize_text, NormalizedText};

/// How close together word-mode events must be to continue one state.
pub const CONTINUITY_WINDOW: Duration = Duration::from_secs(3);

/// One transcription event.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    /// Shared by events describing the same evolving utterance.
    pub grouping: String,
    /// False for preliminary/partial results.
    pub is_final: bool,
    /// True when the backend emits word-by-word rather than whole
    /// sentences.
    pub word_mode: bool,
    pub text: String,
    /// Detected language, BCP-47-ish ("en", "de-DE", ...).
    pub language: Option<String>,
    pub at: Instant,
}

/// What a trigger resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchTarget {
    Clip(Uuid),
    /// Reserved pseudo-recognizable: signals a global stop.
    Stop,
}

/// One recognizable with its trigger phrases, in caller priority order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub target: MatchTarget,
    pub triggers: Vec<String>,
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHit {
    pub target: MatchTarget,
    /// The original spoken words of the matched span.
    pub spoken: Vec<String>,
}

#[derive(Debug)]
struct MatchState {
    grouping: String,
    at: Instant,
    consumed: usize,
}

/// Incremental matcher; one instance per transcription stream consumer.
///
/// Only the latest state is kept: states for finished groupings or past
/// the continuity window simply stop being referenced.
#[derive(Debug, Default)]
pub struct SpeechMatcher {
    state: Option<MatchState>,
}

impl SpeechMatcher {
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Feed one event; returns the first match in the unconsumed words,
    /// if any. A miss leaves the consumed index untouched.
    pub fn push(&mut self, event: &TranscriptEvent, candidates: &[Candidate]) -> Option<MatchHit> {
        let carried = match &self.state {
            Some(prev) if continues(prev, event) => prev.consumed,
            _ => 0,
        };

        let language = event.language.as_deref();
        let norm = normalize_text(&event.text, language);
        let consumed = carried.min(norm.folded.len());

        let hit = scan(&norm, consumed, candidates, language);
        let new_consumed = match &hit {
            Some((end, _)) => *end,
            None => consumed,
        };

        self.state = Some(MatchState {
            grouping: event.grouping.clone(),
            at: event.at,
            consumed: new_consumed,
        });
        hit.map(|(_, hit)| hit)
    }
}

/// Sentence mode continues on an unchanged grouping id; word mode on
/// timestamps within the continuity window.
fn continues(prev: &MatchState, event: &TranscriptEvent) -> bool {
    if event.word_mode {
        event.at.duration_since(prev.at) <= CONTINUITY_WINDOW
    } else {
        prev.grouping == event.grouping
    }
}

/// First candidate (in priority order) whose trigger appears as a
/// contiguous run in the words past `consumed`.
fn scan(
    norm: &NormalizedText,
    consumed: usize,
    candidates: &[Candidate],
    language: Option<&str>,
) -> Option<(usize, MatchHit)> {
    let remaining = &norm.folded[consumed..];
    for candidate in candidates {
        for trigger in &candidate.triggers {
            let trigger_words = normalize_text(trigger, language).folded;
            if trigger_words.is_empty() || trigger_words.len() > remaining.len() {
                continue;
            }
            for pos in 0..=(remaining.len() - trigger_words.len()) {
                if remaining[pos..pos + trigger_words.len()] == trigger_words[..] {
                    let start = consumed + pos;
                    let end = start + trigger_words.len();
                    return Some((
                        end,
                        MatchHit {
                            target: candidate.target.clone(),
                            spoken: norm.original[start..end].to_vec(),
                        },
                    ));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip_candidate(id: Uuid, triggers: &[&str]) -> Candidate {
        Candidate {
            target: MatchTarget::Clip(id),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn sentence(grouping: &str, text: &str) -> TranscriptEvent {
        TranscriptEvent {
            grouping: grouping.into(),
            is_final: false,
            word_mode: false,
            text: text.into(),
            language: Some("en".into()),
            at: Instant::now(),
        }
    }

    #[test]
    fn test_match_consumes_exact_span() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["music up"])];
        let mut matcher = SpeechMatcher::new();

        let hit = matcher
            .push(&sentence("g1", "turn the music up"), &candidates)
            .expect("should match");
        assert_eq!(hit.target, MatchTarget::Clip(id));
        assert_eq!(hit.spoken, vec!["music", "up"]);
    }

    #[test]
    fn test_consumed_state_prevents_refire() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["music up"])];
        let mut matcher = SpeechMatcher::new();

        assert!(matcher
            .push(&sentence("g1", "turn the music up"), &candidates)
            .is_some());
        // The recognizer re-delivers the utterance with more words; the
        // already-consumed span must not fire again.
        assert!(matcher
            .push(&sentence("g1", "turn the music up please"), &candidates)
            .is_none());
        assert!(matcher
            .push(&sentence("g1", "turn the music up"), &candidates)
            .is_none());
    }

    #[test]
    fn test_new_grouping_resets_state() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["music up"])];
        let mut matcher = SpeechMatcher::new();

        assert!(matcher
            .push(&sentence("g1", "turn the music up"), &candidates)
            .is_some());
        // A fresh utterance starts at index zero and may fire again
        assert!(matcher
            .push(&sentence("g2", "music up again"), &candidates)
            .is_some());
    }

    #[test]
    fn test_miss_leaves_consumed_unchanged() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["music up"])];
        let mut matcher = SpeechMatcher::new();

        assert!(matcher
            .push(&sentence("g1", "well hello there"), &candidates)
            .is_none());
        // Same grouping, trigger arrives later in the utterance
        assert!(matcher
            .push(&sentence("g1", "well hello there music up"), &candidates)
            .is_some());
    }

    #[test]
    fn test_candidate_priority_order_wins() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let candidates = vec![
            clip_candidate(first, &["hello"]),
            clip_candidate(second, &["hello there"]),
        ];
        let mut matcher = SpeechMatcher::new();

        let hit = matcher
            .push(&sentence("g1", "hello there"), &candidates)
            .unwrap();
        assert_eq!(hit.target, MatchTarget::Clip(first));
    }

    #[test]
    fn test_stop_pseudo_candidate() {
        let candidates = vec![
            Candidate {
                target: MatchTarget::Stop,
                triggers: vec!["stop".into()],
            },
            clip_candidate(Uuid::new_v4(), &["stop the music"]),
        ];
        let mut matcher = SpeechMatcher::new();

        let hit = matcher
            .push(&sentence("g1", "please stop the music"), &candidates)
            .unwrap();
        assert_eq!(hit.target, MatchTarget::Stop);
        assert_eq!(hit.spoken, vec!["stop"]);
    }

    #[test]
    fn test_punctuation_case_and_inflection_fold() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["play song"])];
        let mut matcher = SpeechMatcher::new();

        let hit = matcher
            .push(&sentence("g1", "Playing songs, now!"), &candidates)
            .unwrap();
        assert_eq!(hit.spoken, vec!["Playing", "songs,"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_word_mode_continuity_window() {
        let id = Uuid::new_v4();
        let candidates = vec![clip_candidate(id, &["music up"])];
        let mut matcher = SpeechMatcher::new();

        let word_event = |text: &str| TranscriptEvent {
            grouping: String::new(),
            is_final: true,
            word_mode: true,
            text: text.into(),
            language: Some("en".into()),
            at: Instant::now(),
        };

        assert!(matcher.push(&word_event("music up"), &candidates).is_some());

        // Within the window the consumed index carries over: the same
        // visible words do not refire.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matcher.push(&word_event("music up"), &candidates).is_none());

        // Past the window the state is abandoned and matching restarts.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(matcher.push(&word_event("music up"), &candidates).is_some());
    }
}
