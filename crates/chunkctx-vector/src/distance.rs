/// Squared Euclidean distance. Callers guarantee equal lengths.
#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Index of the nearest centroid; ties go to the lower index.
pub fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let dist = squared_l2(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squared_l2_matches_hand_computation() {
        assert_eq!(squared_l2(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_l2(&[1.5, -2.0], &[1.5, -2.0]), 0.0);
    }

    #[test]
    fn nearest_centroid_prefers_first_on_tie() {
        let centroids = vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![5.0, 5.0]];
        assert_eq!(nearest_centroid(&[0.0, 0.0], &centroids), 0);
        assert_eq!(nearest_centroid(&[-0.9, 0.1], &centroids), 1);
        assert_eq!(nearest_centroid(&[4.0, 4.0], &centroids), 2);
    }
}
