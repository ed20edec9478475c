//! Row-major single-precision GEMM and the small row helpers built on it.
//!
//! `sgemm_wrapper` computes `C = alpha · op(A) · op(B) + beta · C` where
//! `op(X)` is `X` or `Xᵀ`. The default backend is the pure-Rust
//! `matrixmultiply` kernel; building with `--features blas` routes the call to
//! the system CBLAS instead.

#[cfg(feature = "blas")]
extern crate blas_src;

/// General matrix multiply on row-major buffers.
///
/// * `m`, `n`, `k` - `op(A)` is `m × k`, `op(B)` is `k × n`, `C` is `m × n`
/// * `lda`, `ldb`, `ldc` - row strides of the stored (untransposed) buffers
///
/// # Panics
///
/// Panics if any buffer is too short for the requested dimensions.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_wrapper(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    c: &mut [f32],
    ldc: usize,
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) {
    if m == 0 || n == 0 {
        return;
    }
    let (a_rows, a_cols) = if transpose_a { (k, m) } else { (m, k) };
    let (b_rows, b_cols) = if transpose_b { (n, k) } else { (k, n) };
    assert!(lda >= a_cols && ldb >= b_cols && ldc >= n, "leading dimension too small");
    if k > 0 {
        assert!(
            a.len() >= (a_rows - 1) * lda + a_cols,
            "A buffer too short: {} for {}x{} (lda {})",
            a.len(),
            a_rows,
            a_cols,
            lda
        );
        assert!(
            b.len() >= (b_rows - 1) * ldb + b_cols,
            "B buffer too short: {} for {}x{} (ldb {})",
            b.len(),
            b_rows,
            b_cols,
            ldb
        );
    }
    assert!(
        c.len() >= (m - 1) * ldc + n,
        "C buffer too short: {} for {}x{} (ldc {})",
        c.len(),
        m,
        n,
        ldc
    );

    backend::sgemm(m, n, k, a, lda, b, ldb, c, ldc, transpose_a, transpose_b, alpha, beta);
}

#[cfg(not(feature = "blas"))]
mod backend {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn sgemm(
        m: usize,
        n: usize,
        k: usize,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        c: &mut [f32],
        ldc: usize,
        transpose_a: bool,
        transpose_b: bool,
        alpha: f32,
        beta: f32,
    ) {
        let (rsa, csa) = if transpose_a { (1, lda as isize) } else { (lda as isize, 1) };
        let (rsb, csb) = if transpose_b { (1, ldb as isize) } else { (ldb as isize, 1) };

        // SAFETY: the caller checked every buffer covers the strided extent.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa,
                csa,
                b.as_ptr(),
                rsb,
                csb,
                beta,
                c.as_mut_ptr(),
                ldc as isize,
                1,
            );
        }
    }
}

#[cfg(feature = "blas")]
mod backend {
    use cblas::{sgemm, Layout, Transpose};

    #[allow(clippy::too_many_arguments)]
    pub(super) fn sgemm(
        m: usize,
        n: usize,
        k: usize,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        c: &mut [f32],
        ldc: usize,
        transpose_a: bool,
        transpose_b: bool,
        alpha: f32,
        beta: f32,
    ) {
        let trans_a = if transpose_a {
            Transpose::Ordinary
        } else {
            Transpose::None
        };
        let trans_b = if transpose_b {
            Transpose::Ordinary
        } else {
            Transpose::None
        };

        unsafe {
            sgemm(
                Layout::RowMajor,
                trans_a,
                trans_b,
                m as i32,
                n as i32,
                k as i32,
                alpha,
                a,
                lda as i32,
                b,
                ldb as i32,
                beta,
                c,
                ldc as i32,
            );
        }
    }
}

/// Adds `bias` to every row of a `rows × cols` buffer.
pub fn add_bias(data: &mut [f32], rows: usize, cols: usize, bias: &[f32]) {
    for row in data.chunks_exact_mut(cols).take(rows) {
        for (value, b) in row.iter_mut().zip(bias) {
            *value += *b;
        }
    }
}

/// Accumulates the column sums of a `rows × cols` buffer into `out`.
pub fn sum_rows_into(data: &[f32], rows: usize, cols: usize, out: &mut [f32]) {
    for row in data.chunks_exact(cols).take(rows) {
        for (value, sum) in row.iter().zip(out.iter_mut()) {
            *sum += *value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_product() {
        // [1 2; 3 4] @ [5 6; 7 8]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0f32; 4];
        sgemm_wrapper(2, 2, 2, &a, 2, &b, 2, &mut c, 2, false, false, 1.0, 0.0);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_transposed_operands_accumulate() {
        // Aᵀ @ Bᵀ with beta = 1 adds onto C.
        let a = [1.0, 3.0, 2.0, 4.0]; // stored transposed of [1 2; 3 4]
        let b = [5.0, 7.0, 6.0, 8.0]; // stored transposed of [5 6; 7 8]
        let mut c = [1.0f32; 4];
        sgemm_wrapper(2, 2, 2, &a, 2, &b, 2, &mut c, 2, true, true, 1.0, 1.0);
        assert_eq!(c, [20.0, 23.0, 44.0, 51.0]);
    }

    #[test]
    fn test_alpha_scales() {
        let a = [1.0, 1.0];
        let b = [2.0, 3.0];
        let mut c = [0.0f32; 1];
        sgemm_wrapper(1, 1, 2, &a, 2, &b, 1, &mut c, 1, false, false, 0.5, 0.0);
        assert_eq!(c, [2.5]);
    }

    #[test]
    fn test_bias_and_row_sums() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0];
        add_bias(&mut data, 2, 2, &[10.0, 20.0]);
        assert_eq!(data, vec![11.0, 22.0, 13.0, 24.0]);

        let mut sums = vec![1.0, 1.0];
        sum_rows_into(&data, 2, 2, &mut sums);
        assert_eq!(sums, vec![25.0, 47.0]);
    }
}
