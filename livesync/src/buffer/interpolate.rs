/// Blends two neighbouring samples.
///
/// `t` is in `[0, 1]`: 0 yields `from`, 1 yields `to`.
pub trait Interpolator<T>: Send + Sync {
    fn interpolate(&self, from: &T, to: &T, t: f64) -> T;
}

impl<T, F> Interpolator<T> for F
where
    F: Fn(&T, &T, f64) -> T + Send + Sync,
{
    fn interpolate(&self, from: &T, to: &T, t: f64) -> T {
        self(from, to, t)
    }
}

/// Linear interpolation for scalar samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct LerpInterpolator;

impl Interpolator<f32> for LerpInterpolator {
    fn interpolate(&self, from: &f32, to: &f32, t: f64) -> f32 {
        from + (to - from) * t as f32
    }
}

impl Interpolator<f64> for LerpInterpolator {
    fn interpolate(&self, from: &f64, to: &f64, t: f64) -> f64 {
        from + (to - from) * t
    }
}
