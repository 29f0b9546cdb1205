//! Deterministic data fixtures.

/// `(i, i)` pairs for `i` in `0..n`, ascending.
pub fn sequential_pairs(n: i64) -> Vec<(i64, i64)> {
    (0..n).map(|i| (i, i)).collect()
}

/// A fixed permutation of `(i, 10 * i)` pairs, the same on every run.
///
/// Walks `0..n` with a stride co-prime to `n`, which visits every index
/// exactly once in a scrambled order without pulling in a RNG.
pub fn shuffled_pairs(n: i64) -> Vec<(i64, i64)> {
    let stride = coprime_stride(n);
    (0..n).map(|i| {
        let k = (i * stride) % n;
        (k, 10 * k)
    }).collect()
}

fn coprime_stride(n: i64) -> i64 {
    let mut stride = 37;
    while gcd(stride, n) != 1 {
        stride += 2;
    }
    stride
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}
