//! Coarse quantizer training: Lloyd's k-means over `f32` vectors.
//!
//! Initialisation is k-means++ with D²-weighted sampling from a seeded
//! `StdRng`, so the same corpus and seed always give the same centroids.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::distance::{nearest_centroid, squared_l2};

#[derive(Debug, Clone)]
pub struct KmeansResult {
    pub centroids: Vec<Vec<f32>>,
    pub iterations: usize,
    /// Sum of squared distances from each training point to its centroid.
    pub inertia: f64,
}

/// Trains `k` centroids over `points`.
///
/// At most `max_train_points` points (chosen with the seeded rng) take part.
/// `k` is clamped to `1..=points.len()`; an empty input yields no centroids.
pub fn train(points: &[&[f32]], k: usize, max_iterations: usize, max_train_points: usize, seed: u64) -> KmeansResult {
    if points.is_empty() {
        return KmeansResult { centroids: Vec::new(), iterations: 0, inertia: 0.0 };
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let training: Vec<&[f32]> = if max_train_points > 0 && points.len() > max_train_points {
        let mut picked = sample(&mut rng, points.len(), max_train_points).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| points[i]).collect()
    } else {
        points.to_vec()
    };

    let k = k.clamp(1, training.len());
    let dim = training[0].len();
    let mut centroids = kmeanspp_init(&training, k, &mut rng);
    let mut assignments = vec![usize::MAX; training.len()];
    let mut iterations = 0;

    for _ in 0..max_iterations.max(1) {
        iterations += 1;
        let mut changed = false;
        for (i, p) in training.iter().enumerate() {
            let nearest = nearest_centroid(p, &centroids);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, p) in training.iter().enumerate() {
            let c = assignments[i];
            counts[c] += 1;
            for (j, &v) in p.iter().enumerate() {
                sums[c][j] += v as f64;
            }
        }
        for c in 0..k {
            // Empty cluster keeps its previous centroid.
            if counts[c] == 0 {
                continue;
            }
            let n = counts[c] as f64;
            centroids[c] = sums[c].iter().map(|s| (s / n) as f32).collect();
        }
    }

    let inertia = training
        .iter()
        .map(|p| squared_l2(p, &centroids[nearest_centroid(p, &centroids)]) as f64)
        .sum();
    KmeansResult { centroids, iterations, inertia }
}

fn kmeanspp_init(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());
    let mut min_dist: Vec<f64> = points.iter().map(|p| squared_l2(p, &centroids[0]) as f64).collect();

    while centroids.len() < k {
        let total: f64 = min_dist.iter().sum();
        let next = if !(total.is_finite() && total > 0.0) {
            // All remaining points coincide with a centroid, or a distance overflowed.
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = points.len() - 1;
            for (i, d) in min_dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        let centroid = points[next].to_vec();
        for (i, p) in points.iter().enumerate() {
            let d = squared_l2(p, &centroid) as f64;
            if d < min_dist[i] {
                min_dist[i] = d;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters(centers: &[(f32, f32)], per_cluster: usize) -> Vec<Vec<f32>> {
        let mut out = Vec::new();
        for &(cx, cy) in centers {
            for i in 0..per_cluster {
                let offset = i as f32 * 0.01;
                out.push(vec![cx + offset, cy - offset]);
            }
        }
        out
    }

    #[test]
    fn separates_well_separated_clusters() {
        let data = clusters(&[(0.0, 0.0), (10.0, 10.0), (-10.0, 10.0)], 20);
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let result = train(&refs, 3, 50, 0, 7);
        assert_eq!(result.centroids.len(), 3);
        for center in [[0.0f32, 0.0], [10.0, 10.0], [-10.0, 10.0]] {
            let closest = result.centroids.iter().map(|c| squared_l2(c, &center)).fold(f32::INFINITY, f32::min);
            assert!(closest < 1.0, "no centroid near {center:?}");
        }
        assert!(result.inertia < 1.0);
    }

    #[test]
    fn same_seed_same_centroids() {
        let data = clusters(&[(0.0, 0.0), (5.0, 5.0)], 30);
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        let a = train(&refs, 4, 20, 25, 99);
        let b = train(&refs, 4, 20, 25, 99);
        assert_eq!(a.centroids, b.centroids);
    }

    #[test]
    fn k_is_clamped_to_point_count() {
        let data = vec![vec![1.0f32], vec![2.0]];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        assert_eq!(train(&refs, 10, 5, 0, 1).centroids.len(), 2);
        assert!(train(&[], 3, 5, 0, 1).centroids.is_empty());
    }

    #[test]
    fn non_finite_point_does_not_panic_seeding() {
        let mut data = clusters(&[(0.0, 0.0), (5.0, 5.0)], 50);
        data[17] = vec![f32::NAN, 1.0];
        data[60] = vec![f32::INFINITY, 0.0];
        let refs: Vec<&[f32]> = data.iter().map(|v| v.as_slice()).collect();
        assert_eq!(train(&refs, 4, 15, 20_000, 42).centroids.len(), 4);
    }
}
