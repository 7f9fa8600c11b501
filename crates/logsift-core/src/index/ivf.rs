//! Coarse quantizer for the inverted-file topology: Lloyd k-means over
//! row-major `f32` vectors and nearest-centroid lookup.

use crate::embedding::squared_l2;

/// Train `nlist` centroids over `count = vectors.len() / dim` rows.
///
/// Initial centroids are rows at a fixed stride, so training is
/// deterministic. A centroid that loses all its rows keeps its position.
/// Stops early once no assignment changes.
pub(crate) fn train_centroids(vectors: &[f32], dim: usize, nlist: usize, iterations: usize) -> Vec<f32> {
    let count = vectors.len() / dim;
    if count == 0 || nlist == 0 {
        return Vec::new();
    }

    let mut centroids = Vec::with_capacity(nlist * dim);
    for c in 0..nlist {
        let row = c * count / nlist;
        centroids.extend_from_slice(&vectors[row * dim..(row + 1) * dim]);
    }

    let mut assignments = vec![usize::MAX; count];
    for round in 0..iterations.max(1) {
        let mut changed = 0usize;
        for (i, slot) in assignments.iter_mut().enumerate() {
            let best = nearest_centroid(&centroids, dim, &vectors[i * dim..(i + 1) * dim]);
            if *slot != best {
                *slot = best;
                changed += 1;
            }
        }

        let mut sums = vec![0.0f64; nlist * dim];
        let mut counts = vec![0usize; nlist];
        for (i, &c) in assignments.iter().enumerate() {
            counts[c] += 1;
            for (s, v) in sums[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&vectors[i * dim..(i + 1) * dim])
            {
                *s += *v as f64;
            }
        }
        for c in 0..nlist {
            if counts[c] == 0 {
                continue;
            }
            for j in 0..dim {
                centroids[c * dim + j] = (sums[c * dim + j] / counts[c] as f64) as f32;
            }
        }

        tracing::trace!(round, changed, "k-means round");
        if changed == 0 {
            break;
        }
    }

    centroids
}

/// Index of the centroid closest to `v`. Ties go to the lower index.
pub(crate) fn nearest_centroid(centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_dist = f32::INFINITY;
    for (c, centroid) in centroids.chunks_exact(dim).enumerate() {
        let d = squared_l2(centroid, v);
        if d < best_dist {
            best_dist = d;
            best = c;
        }
    }
    best
}

/// Indices of the `n` centroids closest to `v`, nearest first.
pub(crate) fn nearest_centroids(centroids: &[f32], dim: usize, v: &[f32], n: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = centroids
        .chunks_exact(dim)
        .enumerate()
        .map(|(c, centroid)| (c, squared_l2(centroid, v)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(n).map(|(c, _)| c).collect()
}
