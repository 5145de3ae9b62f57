//! Robin boundary conditions `a*u + b*du/dn = f`
//!
//! At a domain face with cell size `h` normal to it, the ghost value follows
//! from the valid neighbour as `u_ghost = A + B*u_valid` with
//!
//! - `A = f/(b/h + a/2)`
//! - `B = (b/h - a/2)/(b/h + a/2)`
//!
//! Substituted into the stencil, the condition becomes homogeneous Neumann
//! with a modified diagonal `alpha + (1 - B)*beta/h^2` and a modified
//! right-hand side `rhs + A*beta/h^2`.

/// Ghost extrapolation coefficients `(A, B)` of a Robin face
pub fn robin_ghost_extrapolation(a: f64, b: f64, f: f64, h: f64) -> (f64, f64) {
    let bh = b / h;
    let denom = bh + 0.5 * a;
    (f / denom, (bh - 0.5 * a) / denom)
}

/// Diagonal coefficient after folding a Robin face into the adjacent cell
pub fn robin_alpha_correction(alpha: f64, b_lin: f64, beta: f64, h: f64) -> f64 {
    alpha + (1.0 - b_lin) * beta / (h * h)
}

/// Right-hand side after folding a Robin face into the adjacent cell
pub fn robin_rhs_correction(rhs: f64, a_lin: f64, beta: f64, h: f64) -> f64 {
    rhs + a_lin * beta / (h * h)
}

/// Amount added to the stored `A` coefficient of the cell next to a Robin face
///
/// `b_over_a` is `b_scalar/a_scalar`, `dxinv` the inverse cell size normal to
/// the face, `b_face` the stored face coefficient and `(ra, rb)` the Robin
/// `a` and `b` values.
pub(crate) fn robin_a_increment(b_over_a: f64, dxinv: f64, b_face: f64, ra: f64, rb: f64) -> f64 {
    let b_lin = (rb * dxinv - 0.5 * ra) / (rb * dxinv + 0.5 * ra);
    b_over_a * dxinv * dxinv * b_face * (1.0 - b_lin)
}
