//! Hermitian Positive-Definite Solvers
//!
//! The WLS stage only needs "factor once, solve for several right-hand sides".
//! [`HermitianSolver`] is that capability; the factorization strategy is picked
//! by [`SolverKind`].
//!
//! Matrices are dense, row-major, `dim * dim`. Only the lower triangle is read.

use super::options::SolverKind;
use rustfft::num_complex::Complex;

// Pivots at or below this fraction of the largest diagonal entry count as zero.
const PIVOT_REL_EPS: f32 = 1e-7;

pub trait HermitianSolver: Send {
    /// Factors `matrix`. Returns `false` if the factorization is unusable.
    fn factor(&mut self, matrix: &[Complex<f32>], dim: usize) -> bool;

    /// Solves with the last successful factorization.
    fn solve(&self, rhs: &[Complex<f32>], out: &mut [Complex<f32>]);
}

pub fn new_solver(kind: SolverKind) -> Box<dyn HermitianSolver> {
    match kind {
        SolverKind::Cholesky => Box::new(Cholesky::default()),
        SolverKind::Ldlt => Box::new(Ldlt::default()),
    }
}

fn pivot_floor(matrix: &[Complex<f32>], dim: usize) -> f32 {
    let max_diag = (0..dim)
        .map(|i| matrix[i * dim + i].re)
        .fold(0.0f32, f32::max);
    max_diag * PIVOT_REL_EPS
}

// =============================================================================
// Cholesky (LLᴴ)
// =============================================================================

#[derive(Default)]
pub struct Cholesky {
    dim: usize,
    l: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl HermitianSolver for Cholesky {
    fn factor(&mut self, matrix: &[Complex<f32>], dim: usize) -> bool {
        debug_assert_eq!(matrix.len(), dim * dim);
        self.dim = dim;
        self.l.clear();
        self.l.resize(dim * dim, Complex::new(0.0, 0.0));
        self.scratch.resize(dim, Complex::new(0.0, 0.0));

        let floor = pivot_floor(matrix, dim);
        let l = &mut self.l;
        for j in 0..dim {
            let mut d = matrix[j * dim + j].re;
            for k in 0..j {
                d -= l[j * dim + k].norm_sqr();
            }
            if !d.is_finite() || d <= floor {
                return false;
            }
            let pivot = d.sqrt();
            l[j * dim + j] = Complex::new(pivot, 0.0);

            for i in (j + 1)..dim {
                let mut s = matrix[i * dim + j];
                for k in 0..j {
                    s -= l[i * dim + k] * l[j * dim + k].conj();
                }
                l[i * dim + j] = s / pivot;
            }
        }
        true
    }

    fn solve(&self, rhs: &[Complex<f32>], out: &mut [Complex<f32>]) {
        let dim = self.dim;
        let l = &self.l;

        // L y = b
        for i in 0..dim {
            let mut s = rhs[i];
            for k in 0..i {
                s -= l[i * dim + k] * out[k];
            }
            out[i] = s / l[i * dim + i].re;
        }
        // Lᴴ x = y
        for i in (0..dim).rev() {
            let mut s = out[i];
            for k in (i + 1)..dim {
                s -= l[k * dim + i].conj() * out[k];
            }
            out[i] = s / l[i * dim + i].re;
        }
    }
}

// =============================================================================
// LDLᴴ with zero-pivot skipping
// =============================================================================

/// Unit lower `L`, real diagonal `D`. Pivots that vanish are set to zero and
/// their components dropped from the solution, so singular PSD input still
/// yields a finite answer.
#[derive(Default)]
pub struct Ldlt {
    dim: usize,
    l: Vec<Complex<f32>>,
    d: Vec<f32>,
}

impl HermitianSolver for Ldlt {
    fn factor(&mut self, matrix: &[Complex<f32>], dim: usize) -> bool {
        debug_assert_eq!(matrix.len(), dim * dim);
        self.dim = dim;
        self.l.clear();
        self.l.resize(dim * dim, Complex::new(0.0, 0.0));
        self.d.clear();
        self.d.resize(dim, 0.0);

        let floor = pivot_floor(matrix, dim);
        for j in 0..dim {
            let mut dj = matrix[j * dim + j].re;
            for k in 0..j {
                dj -= self.l[j * dim + k].norm_sqr() * self.d[k];
            }
            if !dj.is_finite() {
                return false;
            }
            self.l[j * dim + j] = Complex::new(1.0, 0.0);
            if dj <= floor {
                // column j stays zero below the diagonal
                self.d[j] = 0.0;
                continue;
            }
            self.d[j] = dj;

            for i in (j + 1)..dim {
                let mut s = matrix[i * dim + j];
                for k in 0..j {
                    s -= self.l[i * dim + k] * self.l[j * dim + k].conj() * self.d[k];
                }
                self.l[i * dim + j] = s / dj;
            }
        }
        true
    }

    fn solve(&self, rhs: &[Complex<f32>], out: &mut [Complex<f32>]) {
        let dim = self.dim;
        let l = &self.l;

        for i in 0..dim {
            let mut s = rhs[i];
            for k in 0..i {
                s -= l[i * dim + k] * out[k];
            }
            out[i] = s;
        }
        for i in 0..dim {
            out[i] = if self.d[i] > 0.0 {
                out[i] / self.d[i]
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        for i in (0..dim).rev() {
            let mut s = out[i];
            for k in (i + 1)..dim {
                s -= l[k * dim + i].conj() * out[k];
            }
            out[i] = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f32, im: f32) -> Complex<f32> {
        Complex::new(re, im)
    }

    // A = [[4, 1-i, 0], [1+i, 3, i], [0, -i, 2]]
    fn hpd3() -> Vec<Complex<f32>> {
        vec![
            c(4.0, 0.0),
            c(1.0, -1.0),
            c(0.0, 0.0),
            c(1.0, 1.0),
            c(3.0, 0.0),
            c(0.0, 1.0),
            c(0.0, 0.0),
            c(0.0, -1.0),
            c(2.0, 0.0),
        ]
    }

    fn matvec(a: &[Complex<f32>], x: &[Complex<f32>], dim: usize) -> Vec<Complex<f32>> {
        (0..dim)
            .map(|i| (0..dim).map(|j| a[i * dim + j] * x[j]).sum())
            .collect()
    }

    fn check_solves(solver: &mut dyn HermitianSolver) {
        let a = hpd3();
        assert!(solver.factor(&a, 3));
        let expected = vec![c(1.0, 2.0), c(-0.5, 0.0), c(0.25, -1.0)];
        let b = matvec(&a, &expected, 3);
        let mut x = vec![c(0.0, 0.0); 3];
        solver.solve(&b, &mut x);
        for (got, want) in x.iter().zip(&expected) {
            assert!((got - want).norm() < 1e-5, "{got} vs {want}");
        }
    }

    #[test]
    fn test_cholesky_solves_hermitian_system() {
        check_solves(&mut Cholesky::default());
    }

    #[test]
    fn test_ldlt_solves_hermitian_system() {
        check_solves(&mut Ldlt::default());
    }

    #[test]
    fn test_cholesky_rejects_zero_matrix() {
        let zero = vec![c(0.0, 0.0); 4];
        assert!(!Cholesky::default().factor(&zero, 2));
    }

    #[test]
    fn test_ldlt_zero_matrix_gives_zero_solution() {
        let zero = vec![c(0.0, 0.0); 4];
        let mut solver = Ldlt::default();
        assert!(solver.factor(&zero, 2));
        let mut x = vec![c(9.0, 9.0); 2];
        solver.solve(&[c(1.0, 0.0), c(0.0, 1.0)], &mut x);
        assert!(x.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn test_ldlt_singular_psd_is_finite() {
        // rank one: v vᴴ with v = [1, i]
        let a = vec![c(1.0, 0.0), c(0.0, -1.0), c(0.0, 1.0), c(1.0, 0.0)];
        let mut solver = Ldlt::default();
        assert!(solver.factor(&a, 2));
        let b = vec![c(2.0, 0.0), c(0.0, 2.0)];
        let mut x = vec![c(0.0, 0.0); 2];
        solver.solve(&b, &mut x);
        assert!(x.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        let back = matvec(&a, &x, 2);
        for (got, want) in back.iter().zip(&b) {
            assert!((got - want).norm() < 1e-5);
        }
    }
}
