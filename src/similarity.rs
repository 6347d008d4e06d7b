//! Pairwise cosine similarity over a set of embeddings.

use crate::embedding::l2_normalize;

/// Square, symmetric similarity matrix indexed `[i][j]`.
pub type SimilarityMatrix = Vec<Vec<f32>>;

/// Full pairwise cosine similarity matrix.
///
/// Inputs are re-normalized here regardless of how they were produced, so
/// `matrix[i][j]` is the dot product of unit vectors. The diagonal is exactly
/// `1.0` and each unordered pair is computed once and mirrored. Callers must
/// supply at least two vectors; fewer yields a trivially small matrix.
pub fn compute_pairwise(vectors: &[Vec<f32>]) -> SimilarityMatrix {
    let unit: Vec<Vec<f32>> = vectors.iter().map(|v| l2_normalize(v)).collect();
    let n = unit.len();
    let mut matrix = vec![vec![0.0f32; n]; n];

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let sim = dot(&unit[i], &unit[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    matrix
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
