use crate::physics::BodyState;

/// Sentinel recorded for individuals that cannot be evaluated at all
/// (degenerate geometry, solver blow-up). Low enough to rank below any
/// plausible real score.
pub const MIN_FITNESS: f32 = -1.0e9;

/// Final-sample score: horizontal displacement from spawn, scaled by how
/// level the chassis stayed and by a speed bonus. Backward travel stays
/// negative and the score has no upper bound.
pub fn score_sample(state: &BodyState, spawn_x: f32) -> f32 {
    let displacement = state.position[0] - spawn_x;
    let stability = 1.0 / (1.0 + state.angle.abs());
    let speed_bonus = 0.5 + 0.5 * state.linvel[0].abs();
    let score = displacement * stability * speed_bonus;
    if score.is_finite() {
        score
    } else {
        MIN_FITNESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(x: f32, angle: f32, vx: f32) -> BodyState {
        BodyState {
            position: [x, 0.0],
            angle,
            linvel: [vx, 0.0],
        }
    }

    #[test]
    fn motionless_car_scores_zero() {
        assert_eq!(score_sample(&state(100.0, 0.0, 0.0), 100.0), 0.0);
    }

    #[test]
    fn greater_displacement_scores_higher_at_equal_tilt() {
        let near = score_sample(&state(150.0, 0.3, 2.0), 100.0);
        let far = score_sample(&state(400.0, 0.3, 2.0), 100.0);
        assert!(far > near);
        assert!(near > score_sample(&state(100.0, 0.3, 0.0), 100.0));
    }

    #[test]
    fn backward_travel_stays_negative() {
        let score = score_sample(&state(40.0, 0.1, 1.5), 100.0);
        assert!(score < 0.0);
    }

    #[test]
    fn tilt_decays_the_score() {
        let level = score_sample(&state(200.0, 0.0, 1.0), 100.0);
        let tilted = score_sample(&state(200.0, 2.0, 1.0), 100.0);
        let flipped = score_sample(&state(200.0, 20.0, 1.0), 100.0);
        assert!(level > tilted);
        assert!(tilted > flipped);
        assert!(flipped > 0.0);
    }

    #[test]
    fn non_finite_state_hits_the_sentinel() {
        assert_eq!(score_sample(&state(f32::NAN, 0.0, 0.0), 100.0), MIN_FITNESS);
        assert_eq!(
            score_sample(&state(f32::INFINITY, 0.0, 1.0), 100.0),
            MIN_FITNESS
        );
    }
}
