//! BiCGSTAB (Bi-Conjugate Gradient Stabilized) solver
//!
//! Right-preconditioned BiCGSTAB for non-symmetric systems, such as a
//! symmetric operator whose first row was pinned to remove a null space.

use super::{KrylovConfig, breakdown};
use crate::traits::{LinearOperator, Preconditioner, Scalar};
use ndarray::Array1;
use num_traits::ToPrimitive;

/// BiCGSTAB solver result
#[derive(Debug)]
pub struct BiCgstabSolution<T: Scalar> {
    /// Solution vector
    pub x: Array1<T>,
    /// Number of iterations
    pub iterations: usize,
    /// Final residual norm ||b - Ax||
    pub residual: T,
    /// Whether convergence was achieved
    pub converged: bool,
}

/// Solve Ax = b using the right-preconditioned BiCGSTAB method
pub fn bicgstab<T, A, P>(
    operator: &A,
    preconditioner: &P,
    b: &Array1<T>,
    x0: Option<&Array1<T>>,
    config: &KrylovConfig<T>,
) -> BiCgstabSolution<T>
where
    T: Scalar,
    A: LinearOperator<T> + ?Sized,
    P: Preconditioner<T> + ?Sized,
{
    let n = b.len();
    let mut x = x0
        .cloned()
        .unwrap_or_else(|| Array1::from_elem(n, T::zero()));

    let threshold = config.threshold(operator.norm(b));
    let mut r = b - &operator.apply(&x);
    let mut r_norm = operator.norm(&r);
    if r_norm <= threshold {
        return BiCgstabSolution {
            x,
            iterations: 0,
            residual: r_norm,
            converged: true,
        };
    }

    // Shadow residual
    let r0 = r.clone();

    let mut rho = T::one();
    let mut alpha = T::one();
    let mut omega = T::one();
    let mut p = Array1::from_elem(n, T::zero());
    let mut v = Array1::from_elem(n, T::zero());

    for iter in 0..config.max_iterations {
        let rho_new = operator.inner_product(&r0, &r);
        if breakdown(rho_new) {
            break;
        }

        let beta = (rho_new / rho) * (alpha / omega);
        rho = rho_new;

        // p = r + beta * (p - omega * v)
        p.scaled_add(-omega, &v);
        p = &r + &p.mapv(|pi| pi * beta);

        let p_hat = preconditioner.apply(&p);
        v = operator.apply(&p_hat);

        let r0v = operator.inner_product(&r0, &v);
        if breakdown(r0v) {
            break;
        }
        alpha = rho / r0v;

        // s = r - alpha * v
        let mut s = r;
        s.scaled_add(-alpha, &v);

        let s_norm = operator.norm(&s);
        if s_norm <= threshold {
            x.scaled_add(alpha, &p_hat);
            return BiCgstabSolution {
                x,
                iterations: iter + 1,
                residual: s_norm,
                converged: true,
            };
        }

        let s_hat = preconditioner.apply(&s);
        let t = operator.apply(&s_hat);

        let tt = operator.inner_product(&t, &t);
        if breakdown(tt) {
            r = s;
            break;
        }
        omega = operator.inner_product(&t, &s) / tt;

        // x = x + alpha * p_hat + omega * s_hat
        x.scaled_add(alpha, &p_hat);
        x.scaled_add(omega, &s_hat);

        // r = s - omega * t
        s.scaled_add(-omega, &t);
        r = s;
        r_norm = operator.norm(&r);

        if config.should_log(iter + 1) {
            log::info!(
                "BiCGSTAB iteration {}: residual = {:.6e}",
                iter + 1,
                r_norm.to_f64().unwrap_or(f64::NAN)
            );
        }

        if r_norm <= threshold {
            return BiCgstabSolution {
                x,
                iterations: iter + 1,
                residual: r_norm,
                converged: true,
            };
        }

        if breakdown(omega) {
            break;
        }
    }

    let residual = operator.norm(&(b - &operator.apply(&x)));
    BiCgstabSolution {
        x,
        iterations: config.max_iterations,
        residual,
        converged: residual <= threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preconditioners::DiagonalPreconditioner;
    use crate::sparse::CsrMatrix;
    use crate::traits::IdentityPreconditioner;
    use ndarray::array;

    #[test]
    fn test_bicgstab_nonsymmetric() {
        let dense = array![[4.0_f64, 1.0, 0.0], [2.0, 5.0, 1.0], [0.0, 1.0, 3.0]];
        let a = CsrMatrix::from_dense(&dense, 1e-15);
        let b = array![1.0_f64, 2.0, 3.0];

        let config = KrylovConfig {
            max_iterations: 100,
            tolerance: 1e-12,
            ..Default::default()
        };
        let solution = bicgstab(&a, &IdentityPreconditioner, &b, None, &config);

        assert!(solution.converged, "BiCGSTAB should converge");
        let error = (&a.matvec(&solution.x) - &b).mapv(|e| e * e).sum().sqrt();
        assert!(error < 1e-9, "Solution should satisfy Ax = b");
    }

    #[test]
    fn test_bicgstab_pinned_row() {
        // Neumann 1-D Laplacian with the first row pinned to the identity
        let n = 8;
        let mut triplets = vec![(0, 0, 1.0_f64)];
        for i in 1..n {
            let diag = if i + 1 < n { 2.0 } else { 1.0 };
            triplets.push((i, i, diag));
            triplets.push((i, i - 1, -1.0));
            if i + 1 < n {
                triplets.push((i, i + 1, -1.0));
            }
        }
        let a = CsrMatrix::from_triplets(n, n, triplets);
        let mut b = Array1::from_elem(n, 0.0);
        b[n - 1] = 1.0;

        let m = DiagonalPreconditioner::from_csr(&a);
        let solution = bicgstab(&a, &m, &b, None, &KrylovConfig::default());

        assert!(solution.converged);
        assert!(solution.x[0].abs() < 1e-12);
        let error = (&a.matvec(&solution.x) - &b).mapv(|e| e * e).sum().sqrt();
        assert!(error < 1e-8);
    }
}
