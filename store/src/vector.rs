use crate::error::Result;
use crate::error::StoreError;
use crate::model::VectorHit;

/// Default embedding dimension expected by both backends
pub const DEFAULT_EMBEDDING_DIM: usize = 768;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// `1 - cosine`; 0 for identical directions, 2 for opposite ones.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(StoreError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Little-endian f32 blob.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Rank candidates by cosine distance to `query`, closest first.
pub fn nearest<'a, I>(query: &[f32], candidates: I, k: usize) -> Vec<VectorHit>
where
    I: IntoIterator<Item = (String, &'a [f32])>,
{
    let mut hits: Vec<VectorHit> = candidates
        .into_iter()
        .filter(|(_, vector)| vector.len() == query.len())
        .map(|(id, vector)| VectorHit {
            distance: cosine_distance(query, vector),
            id,
        })
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_blob_preserves_values() {
        let vector = vec![0.25_f32, -1.5, 3.0];
        assert_eq!(decode(&encode(&vector)), vector);
    }

    #[test]
    fn test_nearest_orders_by_distance() {
        let a = [1.0_f32, 0.0];
        let b = [0.7_f32, 0.7];
        let c = [-1.0_f32, 0.0];
        let hits = nearest(
            &[1.0, 0.0],
            vec![
                ("c".to_string(), &c[..]),
                ("a".to_string(), &a[..]),
                ("b".to_string(), &b[..]),
            ],
            2,
        );
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_has_no_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
