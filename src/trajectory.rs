//! Planner output, playback sampling and export
use serde::Serialize;
use std::path::Path;

use crate::keyframe::Mode;
use crate::polynomial::PolynomialSegment;
use crate::TrajectoryError;

/// Quadrotor segment paired with a load segment
///
/// The quadrotor trajectory is only planned while the cable is slack; taut load segments are
/// paired with an explicit `Inactive` marker so both sequences stay the same length.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "segment", rename_all = "snake_case")]
pub enum QuadSegment {
    Inactive,
    Active(PolynomialSegment),
}

impl QuadSegment {
    pub fn is_active(&self) -> bool {
        matches!(self, QuadSegment::Active(_))
    }

    /// The planned segment, `None` for inactive markers
    pub fn segment(&self) -> Option<&PolynomialSegment> {
        match self {
            QuadSegment::Active(segment) => Some(segment),
            QuadSegment::Inactive => None,
        }
    }
}

/// A switch between taut and slack mode at a keyframe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ModeSwitchRecord {
    pub keyframe: usize,
    pub previous: Mode,
    pub next: Mode,
}

impl ModeSwitchRecord {
    /// `(keyframe, previous, next)` with numeric mode codes, 1 = taut and 2 = slack
    /// # Example
    /// ```
    /// use hybrid_load_traj::{ModeSwitchRecord, Mode};
    /// let record = ModeSwitchRecord { keyframe: 1, previous: Mode::Taut, next: Mode::Slack };
    /// assert_eq!(record.as_codes(), (1, 1, 2));
    /// ```
    pub fn as_codes(&self) -> (usize, u8, u8) {
        (self.keyframe, self.previous.code(), self.next.code())
    }
}

/// Result of a planner call
#[derive(Clone, Debug, Serialize)]
pub struct TrajectoryOutput {
    /// Load segments in playback order
    pub load_segments: Vec<PolynomialSegment>,
    /// Quadrotor segments, parallel to `load_segments`
    pub quad_segments: Vec<QuadSegment>,
    /// Mode switches in the order they happened
    pub mode_log: Vec<ModeSwitchRecord>,
    /// Number of segments in each sequence
    pub segment_count: usize,
    /// Input keyframe times, unmodified
    pub keyframe_times: Vec<f64>,
}

/// One playback sample of the trajectory
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrajectorySample {
    pub time: f64,
    pub segment: usize,
    pub mode: Mode,
    pub load_position: f64,
    pub load_velocity: f64,
    pub load_acceleration: f64,
    pub quad_position: Option<f64>,
    pub quad_velocity: Option<f64>,
}

impl TrajectoryOutput {
    /// Total duration of all segments laid back to back
    ///
    /// Free-fall segments last for their flight time, which generally differs from the gap
    /// between the keyframes around them, so this is not `keyframe_times` end minus start.
    pub fn playback_duration(&self) -> f64 {
        self.load_segments.iter().map(|s| s.duration).sum()
    }

    /// Load position, velocity and acceleration at the end of segment `index`
    pub fn load_state_at_end(&self, index: usize) -> Option<Vec<f64>> {
        self.load_segments.get(index).map(|s| s.evaluate(1.0, 2))
    }

    /// Sample the trajectory on the playback timeline
    /// # Arguments
    /// * `dt` - Sampling period in seconds
    /// # Returns
    /// * Samples at `0, dt, 2 dt, ...` followed by one sample at the end of the last segment
    /// # Errors
    /// * `InvalidInput` if `dt` is not positive and finite
    pub fn sample(&self, dt: f64) -> Result<Vec<TrajectorySample>, TrajectoryError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(TrajectoryError::InvalidInput(format!(
                "Sampling period must be positive, got {}",
                dt
            )));
        }
        let mut samples = Vec::new();
        let mut offset = 0.0;
        let mut step = 0usize;
        for (index, (load, quad)) in self
            .load_segments
            .iter()
            .zip(&self.quad_segments)
            .enumerate()
        {
            let end = offset + load.duration;
            let last = index + 1 == self.load_segments.len();
            loop {
                let time = step as f64 * dt;
                if time > end || (time == end && !last) {
                    break;
                }
                samples.push(Self::sample_segment(index, load, quad, time, offset));
                step += 1;
            }
            if last && samples.last().map_or(true, |s| s.time < end) {
                samples.push(Self::sample_segment(index, load, quad, end, offset));
            }
            offset = end;
        }
        Ok(samples)
    }

    fn sample_segment(
        index: usize,
        load: &PolynomialSegment,
        quad: &QuadSegment,
        time: f64,
        offset: f64,
    ) -> TrajectorySample {
        let tau = if load.duration > 0.0 {
            ((time - offset) / load.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let state = load.evaluate(tau, 2);
        let quad_state = quad.segment().map(|s| s.evaluate(tau, 1));
        TrajectorySample {
            time,
            segment: index,
            mode: load.mode,
            load_position: state[0],
            load_velocity: state[1],
            load_acceleration: state[2],
            quad_position: quad_state.as_ref().map(|q| q[0]),
            quad_velocity: quad_state.as_ref().map(|q| q[1]),
        }
    }

    /// Write the full output as pretty-printed JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TrajectoryError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Write playback samples as CSV, one row per sample
    /// # Errors
    /// * If `dt` is invalid or the file cannot be written
    pub fn write_csv<P: AsRef<Path>>(&self, path: P, dt: f64) -> Result<(), TrajectoryError> {
        let mut writer = csv::Writer::from_path(path)?;
        for sample in self.sample(dt)? {
            writer.serialize(sample)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> TrajectoryOutput {
        // x = t over one second, then a two second free fall from rest at x = 1
        let taut = PolynomialSegment::new(vec![1.0, 0.0], 1.0, Mode::Taut);
        let fall = PolynomialSegment::new(vec![-19.6, 0.0, 1.0], 2.0, Mode::Slack);
        let quad = PolynomialSegment::new(vec![0.0, 2.0, 2.0], 2.0, Mode::Slack);
        TrajectoryOutput {
            load_segments: vec![taut, fall],
            quad_segments: vec![QuadSegment::Inactive, QuadSegment::Active(quad)],
            mode_log: vec![ModeSwitchRecord {
                keyframe: 1,
                previous: Mode::Taut,
                next: Mode::Slack,
            }],
            segment_count: 2,
            keyframe_times: vec![0.0, 1.0, 2.0],
        }
    }

    #[test]
    fn test_quad_segment_accessors() {
        assert!(!QuadSegment::Inactive.is_active());
        assert!(QuadSegment::Inactive.segment().is_none());
        let active = QuadSegment::Active(PolynomialSegment::new(vec![1.0], 1.0, Mode::Slack));
        assert!(active.is_active());
        assert_eq!(active.segment().map(|s| s.order()), Some(0));
    }

    #[test]
    fn test_playback_duration() {
        let output = output();
        assert_eq!(output.playback_duration(), 3.0);
        let end = output.load_state_at_end(1).unwrap();
        assert!((end[0] + 18.6).abs() < 1e-12);
        assert!((end[2] + 9.8).abs() < 1e-12);
        assert!(output.load_state_at_end(2).is_none());
    }

    #[test]
    fn test_sample_timeline() {
        let samples = output().sample(0.5).unwrap();
        let times: Vec<f64> = samples.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]);
        // the boundary sample belongs to the next segment
        assert_eq!(samples[2].segment, 1);
        assert_eq!(samples[2].mode, Mode::Slack);
        assert_eq!(samples[1].quad_position, None);
        assert_eq!(samples[1].load_velocity, 1.0);
        assert_eq!(samples[2].load_position, 1.0);
        assert_eq!(samples[2].quad_position, Some(2.0));
        assert_eq!(samples[6].quad_velocity, Some(1.0));
        assert!((samples[6].load_acceleration + 9.8).abs() < 1e-12);
    }

    #[test]
    fn test_sample_includes_end_time() {
        let samples = output().sample(0.4).unwrap();
        let last = samples.last().unwrap();
        assert_eq!(last.time, 3.0);
        assert_eq!(last.segment, 1);
        assert!(samples.windows(2).all(|w| w[0].time < w[1].time));
    }

    #[test]
    fn test_sample_rejects_bad_period() {
        assert!(matches!(
            output().sample(0.0),
            Err(TrajectoryError::InvalidInput(_))
        ));
        assert!(output().sample(f64::NAN).is_err());
    }

    #[test]
    fn test_export() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("trajectory.json");
        let csv_path = dir.path().join("trajectory.csv");
        let output = output();
        output.write_json(&json_path).unwrap();
        output.write_csv(&csv_path, 0.5).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value["segment_count"], 2);
        assert_eq!(value["quad_segments"][0]["state"], "inactive");
        assert_eq!(value["mode_log"][0]["next"], "slack");

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "time");
        assert_eq!(&headers[6], "quad_position");
        assert_eq!(reader.records().count(), 7);
    }
}
