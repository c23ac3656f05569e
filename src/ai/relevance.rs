//! Relevance Signal — does a candidate message fit the conversation it lands in?
//!
//! Five heuristics, each clipped to [0, 1]:
//! 1. Structural — length, punctuation, @-mentions, questions, exclamations
//! 2. Contextual — sender turnover and length similarity against the last few lines
//! 3. Behavioral — how regular the sender's reply latency is
//! 4. Flow — how regular the gaps between recent messages are
//! 5. Temporal — whether the candidate arrives on the usual beat

use super::state::MessageRecord;

const W_STRUCTURAL: f64 = 0.25;
const W_CONTEXTUAL: f64 = 0.30;
const W_BEHAVIORAL: f64 = 0.20;
const W_FLOW: f64 = 0.15;
const W_TEMPORAL: f64 = 0.10;

/// Below this many prior messages every estimate is noise.
pub const MIN_HISTORY: usize = 3;
pub const NEUTRAL: f64 = 0.5;

const CONTEXT_WINDOW: usize = 5;
const FLOW_WINDOW: usize = 20;

const QUESTION_MARKERS: [&str; 10] = [
    "?", "？", "吗", "呢", "什么", "怎么", "为什么", "how", "why", "what",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceBreakdown {
    pub structural: f64,
    pub contextual: f64,
    pub behavioral: f64,
    pub flow: f64,
    pub temporal: f64,
}

impl RelevanceBreakdown {
    pub fn combined(&self) -> f64 {
        (self.structural * W_STRUCTURAL
            + self.contextual * W_CONTEXTUAL
            + self.behavioral * W_BEHAVIORAL
            + self.flow * W_FLOW
            + self.temporal * W_TEMPORAL)
            .clamp(0.0, 1.0)
    }
}

/// Relevance of `candidate` against the messages before it, in [0, 1].
pub fn relevance(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    match breakdown(candidate, history) {
        Some(b) => b.combined(),
        None => NEUTRAL,
    }
}

/// Per-heuristic scores, or `None` when history is too short to judge.
pub fn breakdown(candidate: &MessageRecord, history: &[MessageRecord]) -> Option<RelevanceBreakdown> {
    if history.len() < MIN_HISTORY {
        return None;
    }
    Some(RelevanceBreakdown {
        structural: structural(&candidate.text),
        contextual: contextual(candidate, history),
        behavioral: behavioral(candidate, history),
        flow: flow(candidate, history),
        temporal: temporal(candidate, history),
    })
}

pub fn is_question(text: &str) -> bool {
    let lower = text.to_lowercase();
    QUESTION_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF)
}

// ── Sub-scores ─────────────────────────────────────────

pub fn structural(text: &str) -> f64 {
    let len = text.chars().count();
    if len == 0 {
        return 0.0;
    }
    let mut score: f64 = match len {
        10..=150 => 0.3,
        0..=9 => 0.1,
        _ => 0.2,
    };

    let punct = text
        .chars()
        .filter(|c| c.is_ascii_punctuation() || "，。！？、；：".contains(*c))
        .count() as f64;
    let ratio = punct / len as f64;
    if (0.05..=0.25).contains(&ratio) {
        score += 0.3;
    } else if ratio > 0.25 {
        score += 0.2;
    }

    if text.contains('@') {
        score += 0.4;
    }
    if is_question(text) {
        score += 0.3;
    }
    if text.contains('!') || text.contains('！') || text.chars().any(is_emoji) {
        score += 0.2;
    }
    score.min(1.0)
}

fn contextual(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    let start = history.len().saturating_sub(CONTEXT_WINDOW);
    let recent = &history[start..];
    let Some(last) = recent.last() else {
        return NEUTRAL;
    };
    let mut score: f64 = 0.0;

    if recent
        .iter()
        .filter(|m| m.sender_id == candidate.sender_id)
        .count()
        >= 2
    {
        score += 0.3;
    }
    if last.sender_id != candidate.sender_id {
        score += 0.2;
    }

    let avg_len =
        recent.iter().map(|m| m.text.chars().count()).sum::<usize>() as f64 / recent.len() as f64;
    let len = candidate.text.chars().count() as f64;
    if avg_len > 0.0 && (len - avg_len).abs() <= avg_len * 0.5 {
        score += 0.2;
    }

    let gap = candidate.timestamp - last.timestamp;
    if gap < 300.0 {
        score += 0.3;
    } else if gap < 1800.0 {
        score += 0.2;
    }
    score.min(1.0)
}

/// 1 / (1 + coefficient of variation). Perfectly regular intervals → 1.0.
fn regularity(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return NEUTRAL;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if mean <= 0.0 {
        return NEUTRAL;
    }
    let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    1.0 / (1.0 + var.sqrt() / mean)
}

fn behavioral(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    let mut latencies = Vec::new();
    let mut all: Vec<&MessageRecord> = history.iter().collect();
    all.push(candidate);
    for pair in all.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur.sender_id == candidate.sender_id && prev.sender_id != candidate.sender_id {
            latencies.push((cur.timestamp - prev.timestamp).max(0.0));
        }
    }
    regularity(&latencies)
}

fn gaps(records: &[MessageRecord]) -> Vec<f64> {
    records
        .windows(2)
        .map(|p| (p[1].timestamp - p[0].timestamp).max(0.0))
        .collect()
}

fn flow(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    let start = history.len().saturating_sub(FLOW_WINDOW - 1);
    let mut window: Vec<MessageRecord> = history[start..].to_vec();
    window.push(candidate.clone());
    regularity(&gaps(&window))
}

fn temporal(candidate: &MessageRecord, history: &[MessageRecord]) -> f64 {
    let start = history.len().saturating_sub(FLOW_WINDOW);
    let recent = gaps(&history[start..]);
    let Some(last) = history.last() else {
        return NEUTRAL;
    };
    if recent.is_empty() {
        return NEUTRAL;
    }

    let mut sorted = recent.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let spread = (recent.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / recent.len() as f64)
        .sqrt()
        .max(1.0);

    let deviation = ((candidate.timestamp - last.timestamp) - median).abs();
    if deviation <= spread {
        0.8
    } else if deviation <= 2.0 * spread {
        0.6
    } else {
        0.3
    }
}

// ── Interest ───────────────────────────────────────────

const EXCHANGE_WINDOW_SECS: f64 = 600.0;
const EXCHANGES_FOR_FULL_DENSITY: f64 = 3.0;

/// Bot replies in the last ten minutes sitting next to a message from `user_id`.
pub fn exchange_density(user_id: &str, history: &[MessageRecord], now: f64) -> f64 {
    let mut exchanges = 0usize;
    for (i, rec) in history.iter().enumerate() {
        if !rec.from_bot || now - rec.timestamp > EXCHANGE_WINDOW_SECS {
            continue;
        }
        let before = i.checked_sub(1).and_then(|j| history.get(j));
        let after = history.get(i + 1);
        if [before, after]
            .into_iter()
            .flatten()
            .any(|m| !m.from_bot && m.sender_id == user_id)
        {
            exchanges += 1;
        }
    }
    (exchanges as f64 / EXCHANGES_FOR_FULL_DENSITY).min(1.0)
}

/// How strongly the bot should lock onto `candidate.sender_id` right now.
pub fn interest_score(
    candidate: &MessageRecord,
    history: &[MessageRecord],
    impression: f64,
    addressed: bool,
) -> f64 {
    let density = exchange_density(&candidate.sender_id, history, candidate.timestamp);
    let rel = relevance(candidate, history);
    let mut score = 0.4 * density + 0.3 * rel + 0.3 * impression.clamp(0.0, 1.0);
    if addressed {
        score += 0.2;
    }
    score.min(1.0)
}
