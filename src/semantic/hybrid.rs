//! Hybrid search combining semantic and lexical rankings.
//!
//! Weighted Reciprocal Rank Fusion merges the ranked document ids of
//! both searches. The semantic weight (α) sets the balance: 0.5 is
//! classic RRF and 1.0 is pure semantic ranking.

use std::collections::HashMap;

use serde::Serialize;

use crate::eid::Eid;

/// Higher k flattens the advantage of top-ranked items.
const RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedRank {
    pub id: Eid,
    pub score: f64,
    /// 1-based rank in the semantic list
    pub semantic_rank: Option<usize>,
    /// 1-based rank in the lexical list
    pub lexical_rank: Option<usize>,
}

/// Fuse two rankings (best first) with weighted RRF:
///
///   score(d) = α / (k + rank_semantic) + (1 - α) / (k + rank_lexical)
///
/// Returns every id that appears in either list, highest score first. Ties
/// keep semantic-first insertion order.
pub fn rrf_fusion(semantic_ids: &[Eid], lexical_ids: &[Eid], semantic_weight: f64) -> Vec<FusedRank> {
    let sem_weight = semantic_weight.clamp(0.0, 1.0);
    let lex_weight = 1.0 - sem_weight;

    let mut order: Vec<Eid> = vec![];
    let mut scores: HashMap<Eid, FusedRank> = HashMap::new();

    for (rank, id) in semantic_ids.iter().enumerate() {
        if scores.contains_key(id) {
            continue;
        }
        order.push(id.clone());
        scores.insert(
            id.clone(),
            FusedRank {
                id: id.clone(),
                score: sem_weight / (RRF_K + rank as f64 + 1.0),
                semantic_rank: Some(rank + 1),
                lexical_rank: None,
            },
        );
    }

    for (rank, id) in lexical_ids.iter().enumerate() {
        let rrf_score = lex_weight / (RRF_K + rank as f64 + 1.0);
        match scores.get_mut(id) {
            Some(existing) if existing.lexical_rank.is_none() => {
                existing.score += rrf_score;
                existing.lexical_rank = Some(rank + 1);
            }
            Some(_) => {}
            None => {
                order.push(id.clone());
                scores.insert(
                    id.clone(),
                    FusedRank {
                        id: id.clone(),
                        score: rrf_score,
                        semantic_rank: None,
                        lexical_rank: Some(rank + 1),
                    },
                );
            }
        }
    }

    let mut results: Vec<FusedRank> = order
        .into_iter()
        .filter_map(|id| scores.remove(&id))
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<Eid> {
        raw.iter().map(|s| Eid::from(*s)).collect()
    }

    #[test]
    fn test_rrf_empty_inputs() {
        assert!(rrf_fusion(&[], &[], 0.5).is_empty());
    }

    #[test]
    fn test_rrf_single_side() {
        let results = rrf_fusion(&ids(&["a", "b", "c"]), &[], 0.5);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id.as_str(), "a");
        assert_eq!(results[0].semantic_rank, Some(1));
        assert_eq!(results[0].lexical_rank, None);

        let results = rrf_fusion(&[], &ids(&["x"]), 0.5);
        assert_eq!(results[0].lexical_rank, Some(1));
        assert_eq!(results[0].semantic_rank, None);
    }

    #[test]
    fn test_rrf_overlap_is_boosted() {
        let results = rrf_fusion(&ids(&["a", "b"]), &ids(&["c", "d", "a"]), 0.5);

        assert_eq!(results[0].id.as_str(), "a");
        assert_eq!(results[0].semantic_rank, Some(1));
        assert_eq!(results[0].lexical_rank, Some(3));
        let expected = 0.5 / 61.0 + 0.5 / 63.0;
        assert!((results[0].score - expected).abs() < 1e-9);
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_rrf_weight_decides_conflicts() {
        let semantic = ids(&["a", "b"]);
        let lexical = ids(&["b", "a"]);

        assert_eq!(rrf_fusion(&semantic, &lexical, 0.8)[0].id.as_str(), "a");
        assert_eq!(rrf_fusion(&semantic, &lexical, 0.2)[0].id.as_str(), "b");
    }

    #[test]
    fn test_rrf_weight_clamping() {
        let semantic = ids(&["a"]);
        let lexical = ids(&["b"]);

        let results = rrf_fusion(&semantic, &lexical, 1.5);
        assert_eq!(results[0].id.as_str(), "a");
        assert!((results[0].score - 1.0 / 61.0).abs() < 1e-9);

        let results = rrf_fusion(&semantic, &lexical, -0.5);
        assert_eq!(results[0].id.as_str(), "b");
        assert!((results[0].score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_duplicate_ids_count_once() {
        let results = rrf_fusion(&ids(&["a", "a"]), &ids(&["a", "a"]), 0.5);
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0 / 61.0).abs() < 1e-9);
    }
}
