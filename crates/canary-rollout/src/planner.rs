//! Step planner — expands a percentage triple into the rollout ladder.

use crate::error::{RolloutError, RolloutResult};

/// Expand `initial`, `target`, and `increment` into ordered step percentages.
///
/// Starts at `initial` and advances by `min(increment, target - current)`
/// until `target` has been emitted. The final step lands exactly on
/// `target` even when `increment` does not divide the distance.
pub fn plan_steps(initial: u32, target: u32, increment: u32) -> RolloutResult<Vec<u32>> {
    if increment == 0 {
        return Err(RolloutError::InvalidConfig(
            "increment_percent must be greater than zero".to_string(),
        ));
    }
    if initial > target {
        return Err(RolloutError::InvalidConfig(format!(
            "initial_percent ({initial}) exceeds target_percent ({target})"
        )));
    }
    if target > 100 {
        return Err(RolloutError::InvalidConfig(format!(
            "target_percent ({target}) exceeds 100"
        )));
    }

    let mut steps = Vec::with_capacity((target - initial).div_ceil(increment) as usize + 1);
    let mut current = initial;
    loop {
        steps.push(current);
        if current == target {
            break;
        }
        current += increment.min(target - current);
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_increments() {
        assert_eq!(
            plan_steps(10, 100, 10).unwrap(),
            vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
        );
    }

    #[test]
    fn final_step_lands_on_target() {
        assert_eq!(plan_steps(10, 25, 10).unwrap(), vec![10, 20, 25]);
        assert_eq!(plan_steps(5, 100, 30).unwrap(), vec![5, 35, 65, 95, 100]);
    }

    #[test]
    fn degenerate_single_step() {
        assert_eq!(plan_steps(50, 50, 10).unwrap(), vec![50]);
    }

    #[test]
    fn increment_larger_than_distance() {
        assert_eq!(plan_steps(10, 30, 100).unwrap(), vec![10, 30]);
    }

    #[test]
    fn ladder_properties_hold_across_inputs() {
        for initial in 0..=20u32 {
            for target in initial..=100 {
                for increment in 1..=35u32 {
                    let steps = plan_steps(initial, target, increment).unwrap();
                    assert_eq!(*steps.last().unwrap(), target);
                    assert_eq!(steps[0], initial);
                    assert!(steps.windows(2).all(|w| w[0] < w[1]));
                    assert_eq!(
                        steps.len() as u32,
                        (target - initial).div_ceil(increment) + 1
                    );
                }
            }
        }
    }

    #[test]
    fn rejects_zero_increment() {
        assert!(matches!(
            plan_steps(10, 100, 0),
            Err(RolloutError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_initial_above_target() {
        assert!(matches!(
            plan_steps(60, 50, 10),
            Err(RolloutError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_target_above_hundred() {
        assert!(matches!(
            plan_steps(10, 120, 10),
            Err(RolloutError::InvalidConfig(_))
        ));
    }
}
