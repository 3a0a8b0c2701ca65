use crate::config::{BandNames, CloudMaskParams};
use crate::types::{BurnResult, Observation};
use ndarray::Zip;

/// Scene-classification cloud/quality filter
pub struct CloudMasker {
    params: CloudMaskParams,
    classification_band: String,
}

impl CloudMasker {
    pub fn new(params: CloudMaskParams, bands: &BandNames) -> Self {
        Self {
            params,
            classification_band: bands.classification.clone(),
        }
    }

    fn is_excluded(&self, class_value: f32) -> bool {
        if !class_value.is_finite() {
            return true;
        }
        let class_value = class_value.round();
        self.params
            .excluded_classes
            .iter()
            .any(|&code| f32::from(code) == class_value)
    }

    /// Blank every band where the classification is excluded or missing,
    /// and rescale reflectance bands to surface reflectance.
    pub fn apply(&self, observation: &Observation) -> BurnResult<Observation> {
        let classification = observation
            .image
            .require_band(&self.classification_band, &observation.scene_id)?;
        let usable = classification.mapv(|v| !self.is_excluded(v));

        let mut image = observation.image.clone();
        let scale = self.params.scale_factor;
        for (name, band) in image.bands_mut() {
            let rescale = name != self.classification_band;
            Zip::from(band).and(&usable).for_each(|value, &ok| {
                if !ok {
                    *value = f32::NAN;
                } else if rescale {
                    *value *= scale;
                }
            });
        }

        let masked = usable.iter().filter(|&&ok| !ok).count();
        log::debug!(
            "Scene {}: masked {} of {} pixels",
            observation.scene_id,
            masked,
            usable.len()
        );

        Ok(Observation {
            scene_id: observation.scene_id.clone(),
            date: observation.date,
            image,
        })
    }
}
