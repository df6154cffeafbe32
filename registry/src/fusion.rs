use file_registry_store::FileRecord;
use file_registry_store::ScoredRecord;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Min-max normalize lexical scores into 0..=1. A single score, or all
/// scores equal, normalizes to 1.
pub fn normalize_lexical(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(*s), hi.max(*s))
        });
    let span = max - min;
    scores
        .iter()
        .map(|s| if span > f32::EPSILON { (s - min) / span } else { 1.0 })
        .collect()
}

/// Map a vector distance (lower is closer) to a 0..=1 similarity.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Weighted score fusion of a lexical and a vector ranking. Records present
/// in both rankings sum their weighted scores. Output is best first,
/// truncated to `limit`.
pub fn weighted_fusion(
    lexical: Vec<ScoredRecord>,
    vector: Vec<(FileRecord, f32)>,
    lexical_weight: f32,
    vector_weight: f32,
    limit: usize,
) -> Vec<ScoredRecord> {
    debug!(
        "Weighted fusion: {} lexical + {} vector",
        lexical.len(),
        vector.len()
    );

    let raw: Vec<f32> = lexical.iter().map(|r| r.score.unwrap_or_default()).collect();
    let normalized = normalize_lexical(&raw);

    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, (f32, FileRecord)> = HashMap::new();

    for (item, score) in lexical.into_iter().zip(normalized) {
        let id = item.record.id.clone();
        order.push(id.clone());
        scores.insert(id, (score * lexical_weight, item.record));
    }

    for (record, distance) in vector {
        let weighted = distance_to_score(distance) * vector_weight;
        let id = record.id.clone();
        scores
            .entry(id.clone())
            .and_modify(|e| e.0 += weighted)
            .or_insert_with(|| {
                order.push(id);
                (weighted, record)
            });
    }

    // Stable sort over first-seen order keeps ties deterministic.
    let mut fused: Vec<ScoredRecord> = order
        .into_iter()
        .filter_map(|id| scores.remove(&id))
        .map(|(score, record)| ScoredRecord {
            record,
            score: Some(score),
        })
        .collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
    });
    fused.truncate(limit);
    fused
}
