//! 3x3 rotation algebra for rotation-averaging regression.
//!
//! Histogram buckets accumulate sums of rotation matrices. The representative
//! rotation of a bucket is the proper rotation closest (in Frobenius norm) to
//! that sum, obtained from its singular value decomposition.

use crate::core::types::{ROTATION_RECORD_COUNT, ROTATION_RECORD_LEN};

/// Row-major 3x3 matrix.
pub type Matrix3 = [[f64; 3]; 3];

/// Identity matrix.
pub const IDENTITY: Matrix3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_EPS: f64 = 1e-15;

/// Singular value decomposition `A = U * diag(sigma) * V^T` with
/// `sigma` sorted in decreasing order and `U`, `V` orthonormal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Svd3 {
    /// Left singular vectors (columns)
    pub u: Matrix3,
    /// Singular values, largest first
    pub sigma: [f64; 3],
    /// Right singular vectors (columns)
    pub v: Matrix3,
}

/// Matrix product `a * b`.
pub fn mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Matrix product `a * b^T`.
pub fn mul_transposed(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[j][k]).sum();
        }
    }
    out
}

/// Transpose.
pub fn transpose(m: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in m.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            out[j][i] = *value;
        }
    }
    out
}

/// Determinant.
pub fn determinant(m: &Matrix3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Frobenius inner product `sum_ij a_ij * b_ij`, i.e. `trace(a^T * b)`.
pub fn frobenius_dot(a: &Matrix3, b: &Matrix3) -> f64 {
    a.iter()
        .zip(b)
        .map(|(ra, rb)| ra.iter().zip(rb).map(|(x, y)| x * y).sum::<f64>())
        .sum()
}

fn column(m: &Matrix3, j: usize) -> [f64; 3] {
    [m[0][j], m[1][j], m[2][j]]
}

fn set_column(m: &mut Matrix3, j: usize, c: [f64; 3]) {
    for (row, value) in m.iter_mut().zip(c) {
        row[j] = value;
    }
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Unit vector orthogonal to the unit vector `a`.
fn any_orthogonal(a: [f64; 3]) -> [f64; 3] {
    let axis = if a[0].abs() <= a[1].abs() && a[0].abs() <= a[2].abs() {
        [1.0, 0.0, 0.0]
    } else if a[1].abs() <= a[2].abs() {
        [0.0, 1.0, 0.0]
    } else {
        [0.0, 0.0, 1.0]
    };
    let c = cross(a, axis);
    scale(c, 1.0 / norm(c))
}

/// One-sided Jacobi SVD of a 3x3 matrix.
pub fn svd3(a: &Matrix3) -> Svd3 {
    let mut w = *a;
    let mut v = IDENTITY;

    for _ in 0..JACOBI_MAX_SWEEPS {
        let mut rotated = false;
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            let cp = column(&w, p);
            let cq = column(&w, q);
            let alpha = dot(cp, cp);
            let beta = dot(cq, cq);
            let gamma = dot(cp, cq);
            if gamma == 0.0 || gamma.abs() <= JACOBI_EPS * (alpha * beta).sqrt() {
                continue;
            }
            rotated = true;

            let zeta = (beta - alpha) / (2.0 * gamma);
            let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
            let c = 1.0 / (1.0 + t * t).sqrt();
            let s = c * t;
            for m in [&mut w, &mut v] {
                for row in m.iter_mut() {
                    let (xp, xq) = (row[p], row[q]);
                    row[p] = c * xp - s * xq;
                    row[q] = s * xp + c * xq;
                }
            }
        }
        if !rotated {
            break;
        }
    }

    let mut order = [0usize, 1, 2];
    let norms = [
        norm(column(&w, 0)),
        norm(column(&w, 1)),
        norm(column(&w, 2)),
    ];
    order.sort_by(|a, b| norms[*b].total_cmp(&norms[*a]));

    let mut sorted_w = [[0.0; 3]; 3];
    let mut sorted_v = [[0.0; 3]; 3];
    let mut sigma = [0.0; 3];
    for (dst, src) in order.iter().enumerate() {
        set_column(&mut sorted_w, dst, column(&w, *src));
        set_column(&mut sorted_v, dst, column(&v, *src));
        sigma[dst] = norms[*src];
    }

    let tol = sigma[0] * 1e-12;
    let u0 = if sigma[0] > 0.0 {
        scale(column(&sorted_w, 0), 1.0 / sigma[0])
    } else {
        [1.0, 0.0, 0.0]
    };
    let u1 = {
        let w1 = column(&sorted_w, 1);
        let projected = if sigma[1] > tol {
            let raw = scale(w1, 1.0 / sigma[1]);
            let along = dot(raw, u0);
            [raw[0] - along * u0[0], raw[1] - along * u0[1], raw[2] - along * u0[2]]
        } else {
            [0.0; 3]
        };
        let n = norm(projected);
        if n > 1e-6 {
            scale(projected, 1.0 / n)
        } else {
            any_orthogonal(u0)
        }
    };
    let mut u2 = cross(u0, u1);
    if sigma[2] > tol && dot(column(&sorted_w, 2), u2) < 0.0 {
        u2 = scale(u2, -1.0);
    }

    let mut u = [[0.0; 3]; 3];
    set_column(&mut u, 0, u0);
    set_column(&mut u, 1, u1);
    set_column(&mut u, 2, u2);

    Svd3 {
        u,
        sigma,
        v: sorted_v,
    }
}

/// Proper rotation closest to `m`: `U * V^T`, with the column of the smallest
/// singular value flipped when that product is a reflection.
pub fn closest_rotation(m: &Matrix3) -> Matrix3 {
    let Svd3 { mut u, v, .. } = svd3(m);
    let mut rotation = mul_transposed(&u, &v);
    if determinant(&rotation) < 0.0 {
        let flipped = scale(column(&u, 2), -1.0);
        set_column(&mut u, 2, flipped);
        rotation = mul_transposed(&u, &v);
    }
    rotation
}

/// Rotation `Rz(e[2]) * Ry(e[1]) * Rx(e[0])` from angles about x, y and z.
pub fn rotation_from_euler(euler: [f64; 3]) -> Matrix3 {
    let (sx, cx) = euler[0].sin_cos();
    let (sy, cy) = euler[1].sin_cos();
    let (sz, cz) = euler[2].sin_cos();
    [
        [cz * cy, cz * sy * sx - sz * cx, cz * sy * cx + sz * sx],
        [sz * cy, sz * sy * sx + cz * cx, sz * sy * cx - cz * sx],
        [-sy, cy * sx, cy * cx],
    ]
}

/// Angles `[x, y, z]` such that `rotation_from_euler` reproduces `r`.
pub fn euler_from_rotation(r: &Matrix3) -> [f64; 3] {
    let sy = (-r[2][0]).clamp(-1.0, 1.0);
    let y = sy.asin();
    if (1.0 - sy.abs()) > 1e-9 {
        let x = r[2][1].atan2(r[2][2]);
        let z = r[1][0].atan2(r[0][0]);
        [x, y, z]
    } else {
        // gimbal lock: only x + z (or x - z) is defined
        [0.0, y, (-r[0][1]).atan2(r[1][1])]
    }
}

/// Histogram record of one rotation: the column-major upper 3x4 block of the
/// homogeneous matrix `[R 0; 1 1 1 1]`, whose last entry counts samples.
pub fn rotation_record(r: &Matrix3) -> [f64; ROTATION_RECORD_LEN] {
    [
        r[0][0], r[1][0], r[2][0], 1.0, r[0][1], r[1][1], r[2][1], 1.0, r[0][2], r[1][2], r[2][2],
        1.0,
    ]
}

/// Splits an accumulated record into its matrix sum and sample count.
pub fn record_sum(record: &[f64]) -> (Matrix3, f64) {
    let mut sum = [[0.0; 3]; 3];
    for (i, row) in sum.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = record[4 * j + i];
        }
    }
    (sum, record[ROTATION_RECORD_COUNT])
}

/// Sum of squared Frobenius residuals of `count` rotations with matrix sum
/// `sum` around `rotation`: `6 * count - 2 * <sum, rotation>`.
pub fn rotation_score(sum: &Matrix3, count: f64, rotation: &Matrix3) -> f64 {
    6.0 * count - 2.0 * frobenius_dot(sum, rotation)
}
