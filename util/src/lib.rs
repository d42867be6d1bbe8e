use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Solves a small sparse system through a dense LU decomposition.
pub fn solve_dense(matrix: &CsrMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    DMatrix::from(matrix).lu().solve(rhs)
}

/// Observed convergence orders `log(e_i / e_{i+1}) / log(h_i / h_{i+1})` of consecutive
/// refinements.
pub fn convergence_rates(mesh_sizes: &[f64], errors: &[f64]) -> Vec<f64> {
    assert_eq!(mesh_sizes.len(), errors.len(), "Need one error per mesh size");
    mesh_sizes
        .windows(2)
        .zip(errors.windows(2))
        .map(|(h, e)| (e[0] / e[1]).ln() / (h[0] / h[1]).ln())
        .collect()
}

/// Number of eigenvalues of a symmetric matrix that are small relative to the largest one.
pub fn numerical_nullity(matrix: &CsrMatrix<f64>, relative_tolerance: f64) -> usize {
    let eigenvalues = DMatrix::from(matrix).symmetric_eigenvalues();
    let largest = eigenvalues.amax();
    eigenvalues
        .iter()
        .filter(|lambda| lambda.abs() <= relative_tolerance * largest)
        .count()
}
