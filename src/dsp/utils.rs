use std::f32::consts::PI;

/// Periodic sqrt-Hann window. Used for both analysis and synthesis so the
/// overlap-added product is a plain Hann sum.
pub fn make_sqrt_hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f32 / len as f32).cos()).sqrt())
        .collect()
}

/// Smallest power of two that is `>= n` (at least 1).
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// Largest absolute sample across all channels.
pub fn peak_abs(channels: &[Vec<f32>]) -> f32 {
    channels
        .iter()
        .flat_map(|ch| ch.iter())
        .fold(0.0f32, |acc, &v| acc.max(v.abs()))
}
