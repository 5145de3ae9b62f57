//! CG (Conjugate Gradient) solver
//!
//! Preconditioned Conjugate Gradient for symmetric positive definite systems.

use super::{KrylovConfig, breakdown};
use crate::traits::{LinearOperator, Preconditioner, Scalar};
use ndarray::Array1;
use num_traits::ToPrimitive;

/// CG solver result
#[derive(Debug)]
pub struct CgSolution<T: Scalar> {
    /// Solution vector
    pub x: Array1<T>,
    /// Number of iterations
    pub iterations: usize,
    /// Final residual norm ||b - Ax||
    pub residual: T,
    /// Whether convergence was achieved
    pub converged: bool,
}

/// Solve Ax = b using the preconditioned Conjugate Gradient method
///
/// Only correct for symmetric positive definite A and symmetric M.
pub fn cg<T, A, P>(
    operator: &A,
    preconditioner: &P,
    b: &Array1<T>,
    x0: Option<&Array1<T>>,
    config: &KrylovConfig<T>,
) -> CgSolution<T>
where
    T: Scalar,
    A: LinearOperator<T> + ?Sized,
    P: Preconditioner<T> + ?Sized,
{
    let mut x = x0
        .cloned()
        .unwrap_or_else(|| Array1::from_elem(b.len(), T::zero()));

    let threshold = config.threshold(operator.norm(b));
    let mut r = b - &operator.apply(&x);
    let mut r_norm = operator.norm(&r);
    if r_norm <= threshold {
        return CgSolution {
            x,
            iterations: 0,
            residual: r_norm,
            converged: true,
        };
    }

    let mut z = preconditioner.apply(&r);
    let mut p = z.clone();
    let mut rz = operator.inner_product(&r, &z);
    let mut iterations = 0;
    if breakdown(rz) {
        log::warn!("CG breakdown: (r, z) vanished before the first iteration");
        return CgSolution {
            x,
            iterations,
            residual: r_norm,
            converged: false,
        };
    }

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        let q = operator.apply(&p);
        let pq = operator.inner_product(&p, &q);
        if breakdown(pq) {
            log::warn!("CG breakdown at iteration {iterations}: (p, Ap) vanished");
            break;
        }
        let alpha = rz / pq;

        x.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &q);
        r_norm = operator.norm(&r);

        if config.should_log(iter + 1) {
            log::info!(
                "CG iteration {}: residual = {:.6e}",
                iter + 1,
                r_norm.to_f64().unwrap_or(f64::NAN)
            );
        }

        if r_norm <= threshold {
            return CgSolution {
                x,
                iterations: iter + 1,
                residual: r_norm,
                converged: true,
            };
        }

        z = preconditioner.apply(&r);
        let rz_new = operator.inner_product(&r, &z);
        if breakdown(rz_new) {
            log::warn!("CG breakdown at iteration {iterations}: (r, z) vanished");
            break;
        }
        let beta = rz_new / rz;
        rz = rz_new;

        // p = z + beta * p
        p = &z + &p.mapv(|pi| pi * beta);
    }

    CgSolution {
        x,
        iterations,
        residual: r_norm,
        converged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioners::DiagonalPreconditioner;
    use crate::sparse::CsrMatrix;
    use crate::traits::IdentityPreconditioner;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cg_spd() {
        let dense = array![[4.0_f64, 1.0], [1.0, 3.0]];
        let a = CsrMatrix::from_dense(&dense, 1e-15);
        let b = array![1.0_f64, 2.0];

        let config = KrylovConfig {
            max_iterations: 100,
            tolerance: 1e-12,
            ..Default::default()
        };
        let solution = cg(&a, &IdentityPreconditioner, &b, None, &config);

        assert!(solution.converged, "CG should converge for SPD matrix");
        let error = (&a.matvec(&solution.x) - &b).mapv(|e| e * e).sum().sqrt();
        assert!(error < 1e-10, "Solution should satisfy Ax = b");
    }

    #[test]
    fn test_cg_jacobi_on_scaled_laplacian() {
        let n = 20;
        let mut triplets = Vec::new();
        for i in 0..n {
            let s = 1.0 + i as f64;
            triplets.push((i, i, 2.0 * s));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
                triplets.push((i - 1, i, -1.0));
            }
        }
        let a = CsrMatrix::from_triplets(n, n, triplets);
        let b = Array1::from_elem(n, 1.0);
        let m = DiagonalPreconditioner::from_csr(&a);

        let solution = cg(&a, &m, &b, None, &KrylovConfig::default());
        assert!(solution.converged);
        assert!(solution.iterations <= n);
    }

    #[test]
    fn test_cg_initial_guess_already_solves() {
        let a: CsrMatrix<f64> = CsrMatrix::identity(3);
        let b = array![1.0, 2.0, 3.0];
        let solution = cg(&a, &IdentityPreconditioner, &b, Some(&b), &KrylovConfig::default());
        assert!(solution.converged);
        assert_eq!(solution.iterations, 0);
    }

    #[test]
    fn test_cg_absolute_tolerance() {
        let a: CsrMatrix<f64> = CsrMatrix::identity(2);
        let b = array![1e-8, 0.0];
        let config = KrylovConfig {
            tolerance: 0.0,
            absolute_tolerance: 1e-6,
            ..Default::default()
        };
        let solution = cg(&a, &IdentityPreconditioner, &b, None, &config);
        assert!(solution.converged);
        assert_eq!(solution.iterations, 0);
    }

    /// Hands back the residual once, then only zeros
    struct FadingPreconditioner {
        calls: AtomicUsize,
    }

    impl Preconditioner<f64> for FadingPreconditioner {
        fn apply(&self, r: &Array1<f64>) -> Array1<f64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                r.clone()
            } else {
                Array1::zeros(r.len())
            }
        }
    }

    #[test]
    fn test_cg_stops_when_preconditioned_residual_vanishes() {
        let a = CsrMatrix::from_dense(&array![[1.0_f64, 0.0], [0.0, 2.0]], 1e-15);
        let b = array![1.0_f64, 1.0];
        let m = FadingPreconditioner {
            calls: AtomicUsize::new(0),
        };
        let solution = cg(&a, &m, &b, None, &KrylovConfig::default());
        assert!(!solution.converged);
        assert_eq!(solution.iterations, 1);
        assert!(solution.x.iter().all(|v| v.is_finite()));
        assert!((solution.x[0] - 2.0 / 3.0).abs() < 1e-14);
    }
}
