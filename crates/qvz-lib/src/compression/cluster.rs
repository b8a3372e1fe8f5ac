//! Deterministic k-means grouping of reads by quality profile.
//!
//! Each cluster later gets its own codebook. Centers are seeded from reads
//! spaced evenly through the input, so the result depends only on the data.

use rayon::prelude::*;
use tracing::debug;

use super::alphabet::Symbol;

/// Refinement passes before giving up on convergence.
pub const CLUSTER_MAX_ITER: usize = 25;

/// Squared distance over the columns the read actually has.
fn distance(read: &[Symbol], center: &[f64]) -> f64 {
    read.iter()
        .zip(center)
        .map(|(&x, &c)| {
            let d = x as f64 - c;
            d * d
        })
        .sum()
}

fn nearest(read: &[Symbol], centers: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centers.iter().enumerate() {
        let d = distance(read, c);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

/// Assign every read to one of `k` clusters. With `k <= 1` all reads land in
/// cluster 0. Clusters may end up empty.
pub fn assign_clusters(reads: &[Vec<Symbol>], k: usize, columns: usize) -> Vec<usize> {
    let n = reads.len();
    if k <= 1 || n == 0 {
        return vec![0; n];
    }
    let seeds = k.min(n);

    let mut centers: Vec<Vec<f64>> = (0..seeds)
        .map(|c| {
            let read = &reads[c * n / seeds];
            let mut center = vec![0.0; columns];
            for (slot, &x) in center.iter_mut().zip(read) {
                *slot = x as f64;
            }
            center
        })
        .collect();

    let mut assignment: Vec<usize> = vec![usize::MAX; n];
    for iter in 0..CLUSTER_MAX_ITER {
        let next: Vec<usize> = reads.par_iter().map(|r| nearest(r, &centers)).collect();
        let moved = next.iter().zip(&assignment).filter(|(a, b)| a != b).count();
        assignment = next;
        debug!("k-means pass {iter}: {moved} reads changed cluster");
        if moved == 0 {
            break;
        }

        let mut sums = vec![vec![0.0; columns]; seeds];
        let mut counts = vec![vec![0u64; columns]; seeds];
        for (read, &c) in reads.iter().zip(&assignment) {
            for (j, &x) in read.iter().take(columns).enumerate() {
                sums[c][j] += x as f64;
                counts[c][j] += 1;
            }
        }
        for c in 0..seeds {
            for j in 0..columns {
                if counts[c][j] > 0 {
                    centers[c][j] = sums[c][j] / counts[c][j] as f64;
                }
            }
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cluster() {
        let reads = vec![vec![1, 2], vec![3]];
        assert_eq!(assign_clusters(&reads, 1, 2), vec![0, 0]);
        assert!(assign_clusters(&[], 4, 2).is_empty());
    }

    #[test]
    fn test_separates_groups() {
        let mut reads = Vec::new();
        for i in 0..40u8 {
            if i % 2 == 0 {
                reads.push(vec![38 + i % 3; 10]);
            } else {
                reads.push(vec![2 + i % 3; 10]);
            }
        }
        let ids = assign_clusters(&reads, 2, 10);
        for (i, &c) in ids.iter().enumerate() {
            assert_eq!(c, ids[i % 2], "read {i}");
        }
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_deterministic() {
        let reads: Vec<Vec<Symbol>> = (0..100u32)
            .map(|i| (0..8u32).map(|j| ((i * 7 + j * 11) % 40) as Symbol).collect())
            .collect();
        assert_eq!(assign_clusters(&reads, 3, 8), assign_clusters(&reads, 3, 8));
        assert!(assign_clusters(&reads, 3, 8).iter().all(|&c| c < 3));
    }

    #[test]
    fn test_more_clusters_than_reads() {
        let reads = vec![vec![5u8; 4], vec![30u8; 4]];
        let ids = assign_clusters(&reads, 4, 4);
        assert_eq!(ids, vec![0, 1]);
    }
}
