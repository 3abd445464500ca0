//! Joins the posteriorgram with the prosody features into the per-frame input of the mel
//! generator.
use crate::error::VcError;
use crate::prosody::ProsodyFeatures;
use ndarray::{concatenate, Array1, Array2, Array3, Axis};

/// Number of prosody columns appended to every posteriorgram frame.
pub const PROSODY_WIDTH: usize = 2;

/// Concatenates `[ppg | ln(zcr + 1e-8) | log_energy]` for every frame giving a
/// `(frames, ppg_width + 2)` array. The sequences have to agree on frame count, a mismatch means
/// the padding/framing assumptions don't hold for this model and nothing sensible can be
/// generated.
pub fn align_features(
    ppg: &Array2<f32>,
    prosody: &ProsodyFeatures,
) -> Result<Array2<f32>, VcError> {
    let frames = ppg.nrows();
    if frames != prosody.len() || prosody.zcr.len() != prosody.log_energy.len() {
        return Err(VcError::FrameMismatch {
            ppg: frames,
            prosody: prosody.len(),
        });
    }

    let log_zcr = prosody.log_zcr().collect::<Array1<f32>>().insert_axis(Axis(1));
    let log_energy = Array1::from_vec(prosody.log_energy.clone()).insert_axis(Axis(1));

    concatenate(Axis(1), &[ppg.view(), log_zcr.view(), log_energy.view()]).map_err(|_| {
        VcError::UnexpectedShape {
            name: "ppg",
            shape: ppg.shape().to_vec(),
        }
    })
}

/// Converts the `(frames, features)` layout into the `(1, features, frames)` layout the mel
/// generator's encoder expects.
pub fn to_model_input(features: &Array2<f32>) -> Array3<f32> {
    features.t().insert_axis(Axis(0)).to_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::arr2;

    fn prosody(log_energy: Vec<f32>, zcr: Vec<f32>) -> ProsodyFeatures {
        ProsodyFeatures { log_energy, zcr }
    }

    #[test]
    fn appends_two_columns() {
        let ppg = arr2(&[[0.9, 0.1, 0.0], [0.2, 0.7, 0.1]]);
        let features = prosody(vec![-1.0, -2.0], vec![0.5, 0.0]);

        let aligned = align_features(&ppg, &features).unwrap();
        assert_eq!(aligned.shape(), &[2, 3 + PROSODY_WIDTH]);
        assert_eq!(&aligned.row(0).to_vec()[..3], &[0.9, 0.1, 0.0]);
        assert!((aligned[[0, 3]] - 0.5f32.ln()).abs() < 1e-6);
        assert!((aligned[[1, 3]] - 1e-8f32.ln()).abs() < 1e-3);
        assert_eq!(aligned[[0, 4]], -1.0);
        assert_eq!(aligned[[1, 4]], -2.0);
    }

    #[test]
    fn mismatch_is_reported() {
        let ppg = Array2::<f32>::zeros((5, 144));
        let features = prosody(vec![0.0; 4], vec![0.0; 4]);

        assert_eq!(
            align_features(&ppg, &features),
            Err(VcError::FrameMismatch { ppg: 5, prosody: 4 })
        );
    }

    #[test]
    fn model_layout() {
        let features = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let input = to_model_input(&features);
        assert_eq!(input.shape(), &[1, 3, 2]);
        assert_eq!(input[[0, 2, 1]], 6.0);
        assert_eq!(input[[0, 0, 1]], 4.0);
    }
}
