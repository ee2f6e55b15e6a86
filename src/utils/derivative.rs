//! Adaptive central difference quotients.
use nalgebra::{convert, RealField};
use num_traits::Float;

const STEP_RATIO: f64 = 2.;
/// Size of the extrapolation tableau.
const TABLEAU: usize = 10;
/// Stop once the error grows by this factor over the best estimate.
const SAFE: f64 = 2.;

/// Derivative of `f` at `x` by central differences with Richardson extrapolation.
///
/// The step starts at a tenth of `$\max(|x|, 1)$` and is divided by two for
/// each new row of the tableau; every row eliminates the next even power of
/// `$h$` from the truncation error. The estimate with the smallest change
/// between successive extrapolations wins. The procedure is due to
///
/// > C. J. F. Ridders. Accurate computation of F'(x) and F'(x)F''(x).
/// > Advances in Engineering Software, Vol. 4, No. 2 (1982), pp. 75-76.
///
/// Returns `None` as soon as `f` does.
pub fn derivative<F: RealField + Float>(x: F, mut f: impl FnMut(F) -> Option<F>) -> Option<F> {
    let ratio: F = convert(STEP_RATIO);
    let ratio2 = ratio * ratio;
    let two: F = convert(2.);
    let mut h = Float::max(Float::abs(x), F::one()) * convert(0.1);
    let mut central = |h: F| -> Option<F> { Some((f(x + h)? - f(x - h)?) / (two * h)) };

    let mut previous = vec![central(h)?];
    let mut best = previous[0];
    let mut error = <F as Float>::max_value();
    for _ in 1..TABLEAU {
        h /= ratio;
        let mut row = Vec::with_capacity(previous.len() + 1);
        row.push(central(h)?);
        let mut factor = ratio2;
        for j in 1..=previous.len() {
            let next = (row[j - 1] * factor - previous[j - 1]) / (factor - F::one());
            factor *= ratio2;
            let change = Float::max(
                Float::abs(next - row[j - 1]),
                Float::abs(next - previous[j - 1]),
            );
            if change <= error {
                error = change;
                best = next;
            }
            row.push(next);
        }
        let diagonal = Float::abs(row[row.len() - 1] - previous[previous.len() - 1]);
        previous = row;
        if diagonal >= error * convert(SAFE) {
            break;
        }
    }
    Some(best)
}
