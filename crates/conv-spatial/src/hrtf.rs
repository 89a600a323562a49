//! Database of per-direction impulse responses with nearest-neighbor
//! lookup, mirroring the azimuth/elevation grid a measured HRIR set is
//! shipped as.

use std::sync::Arc;

use conv_dsp::{FftPlan, ImpulseResponse};

use crate::error::{SpatialError, SpatialResult};

fn normalize_azimuth(az: f32) -> f32 {
    let wrapped = az % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Circular distance between two azimuths in `[0, 360)`.
fn azimuth_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs();
    d.min(360.0 - d)
}

type AzimuthEntry = (f32, Arc<ImpulseResponse>);

/// Measured or synthesized impulse responses indexed by direction.
/// Elevations and, within an elevation, azimuths are kept in
/// insertion order (not a hashed map) so that nearest-neighbor ties
/// resolve deterministically to whichever entry was added first.
pub struct Hrtf {
    plan: Arc<FftPlan>,
    rate: Option<f64>,
    entries: Vec<(f32, Vec<AzimuthEntry>)>,
}

impl Hrtf {
    pub fn new(plan: Arc<FftPlan>) -> Self {
        Self {
            plan,
            rate: None,
            entries: Vec::new(),
        }
    }

    pub fn plan(&self) -> &Arc<FftPlan> {
        &self.plan
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, az)| az.is_empty())
    }

    /// Adds one direction's impulse response. The first buffer accepted
    /// fixes this database's sample rate; later buffers at a different
    /// rate are rejected.
    pub fn add_impulse_response(
        &mut self,
        buffer: &[f32],
        rate: f64,
        azimuth: f32,
        elevation: f32,
    ) -> SpatialResult<()> {
        match self.rate {
            None => self.rate = Some(rate),
            Some(expected) if (expected - rate).abs() > f64::EPSILON => {
                return Err(SpatialError::RateMismatch { expected, got: rate });
            }
            Some(_) => {}
        }

        let specs = conv_core::Specs::mono(rate);
        let ir = Arc::new(
            ImpulseResponse::from_buffer(buffer, specs, Arc::clone(&self.plan))
                .map_err(SpatialError::Conv)?,
        );

        let az = normalize_azimuth(azimuth);
        let elevation_entries = match self.entries.iter_mut().find(|(e, _)| *e == elevation) {
            Some((_, azs)) => azs,
            None => {
                self.entries.push((elevation, Vec::new()));
                &mut self.entries.last_mut().unwrap().1
            }
        };
        match elevation_entries.iter_mut().find(|(a, _)| *a == az) {
            Some(entry) => entry.1 = ir,
            None => elevation_entries.push((az, ir)),
        }
        Ok(())
    }

    /// Looks up the left- and right-ear impulse responses nearest
    /// `*azimuth`/`*elevation`, overwriting both with the angles the
    /// lookup actually resolved to. Returns `(None, None)` for an empty
    /// database.
    pub fn get_impulse_response(
        &self,
        azimuth: &mut f32,
        elevation: &mut f32,
    ) -> (Option<Arc<ImpulseResponse>>, Option<Arc<ImpulseResponse>>) {
        if self.entries.is_empty() {
            return (None, None);
        }

        let mut best_elev_idx = 0;
        let mut best_elev_dist = f32::MAX;
        for (i, (e, _)) in self.entries.iter().enumerate() {
            let d = (*e - *elevation).abs();
            if d < best_elev_dist {
                best_elev_dist = d;
                best_elev_idx = i;
            }
        }
        let (elev_key, azimuths) = &self.entries[best_elev_idx];
        *elevation = *elev_key;

        if azimuths.is_empty() {
            return (None, None);
        }

        let az = normalize_azimuth(*azimuth);
        let mut best_az_idx = 0;
        let mut best_az_dist = f32::MAX;
        for (i, (a, _)) in azimuths.iter().enumerate() {
            let d = azimuth_distance(*a, az);
            if d < best_az_dist {
                best_az_dist = d;
                best_az_idx = i;
            }
        }
        let (right_key, right_ir) = &azimuths[best_az_idx];
        *azimuth = *right_key;

        let az_left = normalize_azimuth(360.0 - *right_key);
        let left_ir = match azimuths.iter().find(|(a, _)| *a == az_left) {
            Some((_, ir)) => ir,
            None => {
                let mut best_idx = 0;
                let mut best_dist = f32::MAX;
                for (i, (a, _)) in azimuths.iter().enumerate() {
                    let d = azimuth_distance(*a, az_left);
                    if d < best_dist {
                        best_dist = d;
                        best_idx = i;
                    }
                }
                &azimuths[best_idx].1
            }
        };

        (Some(Arc::clone(left_ir)), Some(Arc::clone(right_ir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Arc<FftPlan> {
        Arc::new(FftPlan::new(16, 0.0).unwrap())
    }

    #[test]
    fn empty_database_returns_none() {
        let hrtf = Hrtf::new(plan());
        let mut az = 0.0;
        let mut el = 0.0;
        assert_eq!(hrtf.get_impulse_response(&mut az, &mut el), (None, None));
    }

    #[test]
    fn symmetric_pair_mirrors_azimuth() {
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[1.0], 48000.0, 30.0, 0.0).unwrap();
        hrtf.add_impulse_response(&[0.5], 48000.0, 330.0, 0.0).unwrap();

        let mut az = 30.0;
        let mut el = 0.0;
        let (left, right) = hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!(az, 30.0);
        assert!(left.is_some());
        assert!(right.is_some());
        // right ear is the direct 30-degree entry, left is the mirrored 330-degree entry
        assert_eq!(right.unwrap().length(), 1);
        assert_eq!(left.unwrap().length(), 1);
    }

    #[test]
    fn nearest_neighbor_rounds_to_closest_grid_point() {
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[1.0], 48000.0, 0.0, 0.0).unwrap();
        hrtf.add_impulse_response(&[1.0], 48000.0, 90.0, 0.0).unwrap();

        let mut az = 10.0;
        let mut el = 0.0;
        hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!(az, 0.0);
    }

    #[test]
    fn elevation_ties_resolve_to_first_inserted() {
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[1.0], 48000.0, 0.0, -10.0).unwrap();
        hrtf.add_impulse_response(&[1.0], 48000.0, 0.0, 10.0).unwrap();

        let mut az = 0.0;
        let mut el = 0.0; // equidistant from -10 and 10
        hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!(el, -10.0, "first-inserted elevation should win the tie");
    }

    #[test]
    fn rejects_rate_mismatch() {
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[1.0], 48000.0, 0.0, 0.0).unwrap();
        let err = hrtf.add_impulse_response(&[1.0], 44100.0, 0.0, 0.0);
        assert!(err.is_err());
    }

    #[test]
    fn s5_nearest_lookup_resolves_elevation_before_azimuth() {
        // Elevations {-40, 0, 40}, azimuths {0, 90, 180, 270} at each.
        // Query (az=30, el=10) should resolve to (0, 0): elevation 0 is
        // nearest to 10 (distance 10 vs. 50 and 30), then azimuth 0 is
        // nearest to 30 among {0, 90, 180, 270} within that elevation.
        let mut hrtf = Hrtf::new(plan());
        for el in [-40.0, 0.0, 40.0] {
            for az in [0.0, 90.0, 180.0, 270.0] {
                hrtf.add_impulse_response(&[1.0], 48000.0, az, el).unwrap();
            }
        }

        let mut az = 30.0;
        let mut el = 10.0;
        let (left, right) = hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!((az, el), (0.0, 0.0));
        assert!(left.is_some());
        assert!(right.is_some());
    }

    #[test]
    fn s7_left_ear_falls_back_to_nearest_azimuth_when_the_mirror_is_absent() {
        // Only azimuth 90 is populated at elevation 0: the right ear is
        // that entry directly, and since its mirror (360 - 90 = 270) is
        // not populated, the left ear falls back to the nearest
        // populated azimuth at the same elevation -- which is also 90,
        // the only entry there is.
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[0.75], 48000.0, 90.0, 0.0).unwrap();

        let mut az = 90.0;
        let mut el = 0.0;
        let (left, right) = hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!(az, 90.0);
        assert!(left.is_some());
        assert!(right.is_some());
        assert_eq!(left.unwrap().length(), right.unwrap().length());
    }

    #[test]
    fn s7_left_ear_falls_back_to_nearest_azimuth_among_several_when_the_mirror_is_absent() {
        // 0 and 90 populated at elevation 0, 270 (the mirror of 90) is
        // not; the left ear for a query resolving to right=90 should
        // fall back to whichever populated azimuth is nearest to 270,
        // which is 0 (distance 90) rather than 90 itself (distance 180).
        let mut hrtf = Hrtf::new(plan());
        hrtf.add_impulse_response(&[1.0, 0.5], 48000.0, 0.0, 0.0).unwrap();
        hrtf.add_impulse_response(&[0.4], 48000.0, 90.0, 0.0).unwrap();

        let mut az = 90.0;
        let mut el = 0.0;
        let (left, right) = hrtf.get_impulse_response(&mut az, &mut el);
        assert_eq!(az, 90.0);
        assert_eq!(right.unwrap().length(), 1); // the 90-degree entry
        assert_eq!(left.unwrap().length(), 2); // the 0-degree entry, not a second 90-degree copy
    }
}
