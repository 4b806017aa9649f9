//! Random masking of categorical inputs

use crate::dataset::Targets;
use crate::encoders::MASK_INDEX;
use crate::error::{Result, TabError};
use ndarray::{concatenate, Array2, Axis};
use rand::Rng;

/// Replicate a batch `num_augs` times and overwrite each categorical element
/// with [`MASK_INDEX`] with probability `mask_prob`.
///
/// Rows are stacked copy after copy, and the targets are tiled to match.
pub fn augmentation<R: Rng + ?Sized>(
    data: &Array2<i64>,
    target: &Targets,
    mask_prob: f64,
    num_augs: usize,
    rng: &mut R,
) -> Result<(Array2<i64>, Targets)> {
    if !(0.0..=1.0).contains(&mask_prob) {
        return Err(TabError::invalid_parameter(
            "mask_prob",
            mask_prob,
            "must be within [0, 1]",
        ));
    }
    if num_augs == 0 {
        return Err(TabError::invalid_parameter("num_augs", 0, "must be at least 1"));
    }
    if target.len() != data.nrows() {
        return Err(TabError::ShapeError {
            expected: format!("{} targets", data.nrows()),
            actual: format!("{} targets", target.len()),
        });
    }

    let mut out = tile_rows(data, num_augs)?;
    if mask_prob > 0.0 {
        out.mapv_inplace(|v| {
            if rng.gen::<f64>() < mask_prob {
                MASK_INDEX
            } else {
                v
            }
        });
    }
    Ok((out, target.repeat(num_augs)))
}

/// `data` stacked on itself `times` times along the row axis
pub(crate) fn tile_rows<T: Clone>(data: &Array2<T>, times: usize) -> Result<Array2<T>> {
    if times == 1 {
        return Ok(data.clone());
    }
    let views = vec![data.view(); times];
    Ok(concatenate(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(42)
    }

    #[test]
    fn test_replication_layout() {
        let data = array![[2, 3], [4, 5]];
        let target = Targets::Classes(Array1::from(vec![0, 1]));
        let (out, t) = augmentation(&data, &target, 0.0, 3, &mut rng()).unwrap();
        assert_eq!(out.shape(), &[6, 2]);
        assert_eq!(out.row(4).to_vec(), vec![2, 3]);
        assert_eq!(t, Targets::Classes(Array1::from(vec![0, 1, 0, 1, 0, 1])));
    }

    #[test]
    fn test_mask_rate_is_roughly_mask_prob() {
        let data = Array2::from_elem((200, 10), 5i64);
        let target = Targets::Regression(Array1::zeros(200));
        let (out, _) = augmentation(&data, &target, 0.4, 1, &mut rng()).unwrap();
        let masked = out.iter().filter(|&&v| v == MASK_INDEX).count() as f64 / 2000.0;
        assert!((masked - 0.4).abs() < 0.05, "masked fraction {}", masked);
    }

    #[test]
    fn test_invalid_arguments() {
        let data = array![[2]];
        let target = Targets::Classes(Array1::from(vec![0]));
        assert!(augmentation(&data, &target, -0.1, 1, &mut rng()).is_err());
        assert!(augmentation(&data, &target, 0.5, 0, &mut rng()).is_err());

        let wrong = Targets::Classes(Array1::from(vec![0, 1]));
        assert!(augmentation(&data, &wrong, 0.5, 1, &mut rng()).is_err());
    }
}
