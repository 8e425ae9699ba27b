//! Velocity profile solver.
//!
//! A profile is a piecewise-linear velocity curve that starts at `v1`, ramps
//! at constant acceleration to a cruise velocity `vm`, holds it, then ramps to
//! `v2`. The area under the curve is the requested distance. Degenerate shapes
//! (pure triangle, single ramp, constant velocity) fall out of the same
//! breakpoint representation with zero-length phases removed.
//!
//! Solving happens in two steps:
//!
//! 1. The time-optimal profile. When the distance is at least what a direct
//!    `v1 -> v2` ramp covers, the axis accelerates to a peak and decelerates;
//!    otherwise it decelerates to a trough and re-accelerates. A peak beyond
//!    `max_velocity` is clipped and the remaining distance is covered by a
//!    cruise at the limit.
//! 2. If the optimum is shorter than the required total time, the cruise is
//!    stretched. For a fixed total time the covered distance is monotonic in
//!    `vm`, so `vm` is found by bisection.
//!
//! [`VelocityProfile::quantize`] then widens (or, failing that, removes)
//! breakpoint intervals shorter than `min_interval` without changing the total
//! time or the distance.

use crate::error::{ScanError, ScanResult};

/// Breakpoints closer than this are considered identical.
const TIME_EPSILON: f64 = 1e-12;

const BISECTION_STEPS: usize = 200;

/// Inputs of a single-axis profile solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileRequest {
    /// Velocity at the start of the profile.
    pub v1: f64,
    /// Velocity at the end of the profile.
    pub v2: f64,
    /// Signed distance to cover.
    pub distance: f64,
    /// Lower bound on the total duration.
    pub min_time: f64,
    /// Magnitude of acceleration used on every ramp.
    pub acceleration: f64,
    /// Velocity limit, applied to `|vm|`.
    pub max_velocity: f64,
    /// Time spent at `v2` before the end of the profile.
    pub velocity_settle: f64,
    /// Shortest allowed interval between breakpoints.
    pub min_interval: f64,
}

/// A solved velocity-vs-time curve.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityProfile {
    request: ProfileRequest,
    times: Vec<f64>,
    velocities: Vec<f64>,
}

/// Ramp time and ramp distance between two velocities.
fn ramp(v_from: f64, v_to: f64, acceleration: f64) -> (f64, f64) {
    let time = (v_to - v_from).abs() / acceleration;
    (time, (v_from + v_to) * time / 2.0)
}

/// Distance covered in `total` seconds by the single-cruise shape at `vm`.
fn cruise_distance(v1: f64, v2: f64, vm: f64, total: f64, acceleration: f64) -> f64 {
    vm * total
        - (vm - v1) * (vm - v1).abs() / (2.0 * acceleration)
        - (vm - v2) * (vm - v2).abs() / (2.0 * acceleration)
}

#[derive(Debug, Clone, Copy)]
struct Shape {
    vm: f64,
    t1: f64,
    tm: f64,
    t2: f64,
}

impl Shape {
    fn total(&self) -> f64 {
        self.t1 + self.tm + self.t2
    }
}

impl VelocityProfile {
    /// Solve the shortest profile satisfying `request`.
    ///
    /// The total time is at least `min_time` and at least twice `min_interval`
    /// so that [`quantize`](Self::quantize) can always produce intervals of
    /// `min_interval` or longer.
    ///
    /// # Errors
    ///
    /// `Convergence` when the request is malformed (non-positive acceleration
    /// or limit, end velocities above the limit) or when no cruise velocity
    /// inside the limit covers the distance in the required time.
    pub fn solve(request: ProfileRequest) -> ScanResult<Self> {
        let ProfileRequest {
            v1,
            v2,
            distance,
            acceleration,
            max_velocity,
            ..
        } = request;

        if !(acceleration.is_finite() && acceleration > 0.0) {
            return Err(ScanError::Convergence(format!(
                "acceleration must be positive, got {acceleration}"
            )));
        }
        if !(max_velocity.is_finite() && max_velocity > 0.0) {
            return Err(ScanError::Convergence(format!(
                "max_velocity must be positive, got {max_velocity}"
            )));
        }
        let limit = max_velocity * (1.0 + 1e-9);
        if v1.abs() > limit || v2.abs() > limit {
            return Err(ScanError::Convergence(format!(
                "end velocities {v1}, {v2} exceed max_velocity {max_velocity}"
            )));
        }

        let settle = request.velocity_settle.max(0.0);
        let move_distance = distance - v2 * settle;
        let fastest = Self::fastest(v1, v2, move_distance, acceleration, max_velocity);
        let t_total = (fastest.total() + settle)
            .max(request.min_time)
            .max(2.0 * request.min_interval);
        let t_move = t_total - settle;

        let shape = if t_move - fastest.total() <= TIME_EPSILON {
            fastest
        } else {
            Self::stretched(v1, v2, move_distance, t_move, acceleration, max_velocity)?
        };

        let mut profile = Self {
            request,
            times: vec![0.0],
            velocities: vec![v1],
        };
        profile.push(shape.t1, shape.vm);
        profile.push(shape.t1 + shape.tm, shape.vm);
        profile.push(t_move, v2);
        if settle > 0.0 {
            profile.push(t_total, v2);
        }
        // a profile with no motion and no duration still needs an end point
        if profile.times.len() == 1 {
            profile.times.push(t_total);
            profile.velocities.push(v2);
        }
        profile.verify()?;
        Ok(profile)
    }

    fn fastest(v1: f64, v2: f64, distance: f64, acceleration: f64, max_velocity: f64) -> Shape {
        let (_, direct) = ramp(v1, v2, acceleration);
        let sum_sq = (v1 * v1 + v2 * v2) / 2.0;
        let peak = if distance >= direct {
            (acceleration * distance + sum_sq).max(0.0).sqrt()
        } else {
            -(sum_sq - acceleration * distance).max(0.0).sqrt()
        };
        let vm = peak.clamp(-max_velocity, max_velocity);
        let (t1, r1) = ramp(v1, vm, acceleration);
        let (t2, r2) = ramp(vm, v2, acceleration);
        let tm = if vm == peak {
            0.0
        } else {
            ((distance - r1 - r2) / vm).max(0.0)
        };
        Shape { vm, t1, tm, t2 }
    }

    fn stretched(
        v1: f64,
        v2: f64,
        distance: f64,
        total: f64,
        acceleration: f64,
        max_velocity: f64,
    ) -> ScanResult<Shape> {
        let reach = acceleration * total;
        let mut lo = ((v1 + v2 - reach) / 2.0).max(-max_velocity);
        let mut hi = ((v1 + v2 + reach) / 2.0).min(max_velocity);
        let tolerance = 1e-9 * distance.abs().max(1.0);
        let d_lo = cruise_distance(v1, v2, lo, total, acceleration);
        let d_hi = cruise_distance(v1, v2, hi, total, acceleration);
        if lo > hi || distance < d_lo - tolerance || distance > d_hi + tolerance {
            return Err(ScanError::Convergence(format!(
                "cannot cover distance {distance} in {total}s between velocities {v1} and {v2} \
                 (reachable range {d_lo}..{d_hi})"
            )));
        }
        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (lo + hi);
            if cruise_distance(v1, v2, mid, total, acceleration) < distance {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let vm = 0.5 * (lo + hi);
        let (t1, _) = ramp(v1, vm, acceleration);
        let (t2, _) = ramp(vm, v2, acceleration);
        let tm = (total - t1 - t2).max(0.0);
        Ok(Shape { vm, t1, tm, t2 })
    }

    fn push(&mut self, time: f64, velocity: f64) {
        let last = self.times.last().copied().unwrap_or(0.0);
        if time - last > TIME_EPSILON {
            self.times.push(time);
            self.velocities.push(velocity);
        } else if self.times.len() > 1 {
            // coincident breakpoint: the later phase owns the velocity
            if let (Some(t), Some(v)) = (self.times.last_mut(), self.velocities.last_mut()) {
                *t = time;
                *v = velocity;
            }
        }
    }

    fn verify(&self) -> ScanResult<()> {
        let limit = self.request.max_velocity * (1.0 + 1e-9);
        if let Some(v) = self.velocities.iter().find(|v| v.abs() > limit) {
            return Err(ScanError::Convergence(format!(
                "profile velocity {v} exceeds max_velocity {}",
                self.request.max_velocity
            )));
        }
        let error = (self.integral() - self.request.distance).abs();
        if error > 1e-9 * self.request.distance.abs().max(1.0) {
            return Err(ScanError::Convergence(format!(
                "profile covers {} instead of {}",
                self.integral(),
                self.request.distance
            )));
        }
        Ok(())
    }

    /// The request this profile was solved for.
    pub fn request(&self) -> &ProfileRequest {
        &self.request
    }

    /// Total duration in seconds.
    pub fn t_total(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Largest `|v|` reached anywhere on the profile.
    pub fn peak_velocity(&self) -> f64 {
        self.velocities.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    /// Absolute breakpoint times (starting at 0) and the velocity at each.
    pub fn make_arrays(&self) -> (Vec<f64>, Vec<f64>) {
        (self.times.clone(), self.velocities.clone())
    }

    fn intervals(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.windows(2).map(|w| w[1] - w[0])
    }

    fn integral(&self) -> f64 {
        self.times
            .windows(2)
            .zip(self.velocities.windows(2))
            .map(|(t, v)| (v[0] + v[1]) * (t[1] - t[0]) / 2.0)
            .sum()
    }

    /// Distance covered after `time` seconds (clamped to the profile).
    pub fn position_at(&self, time: f64) -> f64 {
        let mut position = 0.0;
        for (t, v) in self.times.windows(2).zip(self.velocities.windows(2)) {
            if time >= t[1] {
                position += (v[0] + v[1]) * (t[1] - t[0]) / 2.0;
            } else {
                if time > t[0] {
                    let elapsed = time - t[0];
                    let v_t = v[0] + (v[1] - v[0]) * elapsed / (t[1] - t[0]);
                    position += (v[0] + v_t) * elapsed / 2.0;
                }
                break;
            }
        }
        position
    }

    /// True if any breakpoint interval is shorter than `min_interval`.
    pub fn check_quantize(&self) -> bool {
        let min_interval = self.request.min_interval;
        self.intervals().any(|dt| dt < min_interval - TIME_EPSILON)
    }

    /// Merge breakpoint intervals shorter than `min_interval`.
    ///
    /// The shortest offending interval is widened to `min_interval` by moving
    /// its bordering breakpoints into neighbours that have time to spare. When
    /// the neighbours cannot give enough, the interior breakpoint on the side
    /// of the shorter neighbour is removed instead. After each step every
    /// interior velocity is shifted by one common offset so the distance is
    /// unchanged. A two-interval profile moves its interior breakpoint to the
    /// middle. End velocities and total time are never changed.
    ///
    /// # Errors
    ///
    /// `Convergence` if the corrected velocities exceed `max_velocity`.
    pub fn quantize(&mut self) -> ScanResult<()> {
        let min_interval = self.request.min_interval;
        loop {
            let intervals: Vec<f64> = self.intervals().collect();
            let n = intervals.len();
            let shortest = intervals
                .iter()
                .enumerate()
                .filter(|(_, dt)| **dt < min_interval - TIME_EPSILON)
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(k, _)| k);
            let Some(k) = shortest else { break };

            if n < 2 {
                break;
            }
            if n == 2 {
                let total = self.t_total();
                let (first, last) = (self.velocities[0], self.velocities[2]);
                self.times = vec![0.0, total / 2.0, total];
                self.velocities = vec![first, (first + last) / 2.0, last];
                self.correct_distance();
                break;
            }

            if !self.widen(k, &intervals) {
                let remove = if k == 0 {
                    1
                } else if k == n - 1 {
                    n - 1
                } else if intervals[k - 1] <= intervals[k + 1] {
                    k
                } else {
                    k + 1
                };
                self.times.remove(remove);
                self.velocities.remove(remove);
            }
            self.correct_distance();
        }
        self.verify()
    }

    /// Grow interval `k` to `min_interval` at the expense of its neighbours.
    fn widen(&mut self, k: usize, intervals: &[f64]) -> bool {
        let min_interval = self.request.min_interval;
        let extra = min_interval - intervals[k];
        let spare = |j: usize| (intervals[j] - min_interval).max(0.0);
        let left = if k > 0 { spare(k - 1) } else { 0.0 };
        let right = if k + 1 < intervals.len() { spare(k + 1) } else { 0.0 };
        if left + right < extra {
            return false;
        }
        let from_right = right.min(extra - left.min(extra / 2.0));
        let from_left = extra - from_right;
        if k > 0 {
            self.times[k] -= from_left;
        }
        if k + 1 < intervals.len() {
            self.times[k + 1] += from_right;
        }
        true
    }

    fn correct_distance(&mut self) {
        let n = self.times.len().saturating_sub(1);
        if n < 2 {
            return;
        }
        let intervals: Vec<f64> = self.intervals().collect();
        let weight = intervals[0] / 2.0
            + intervals[1..n - 1].iter().sum::<f64>()
            + intervals[n - 1] / 2.0;
        let delta = (self.request.distance - self.integral()) / weight;
        for v in &mut self.velocities[1..n] {
            *v += delta;
        }
    }
}
