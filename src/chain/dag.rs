use std::collections::{HashMap, HashSet};

use crate::schemas::PlanStep;

use super::ChainError;

/// Topological layering of plan steps: level 0 holds the roots, level k
/// holds steps whose dependencies all lie in earlier levels. Steps within a
/// level have no ordering constraint between them.
pub fn compute_levels(steps: &[PlanStep]) -> Result<Vec<Vec<String>>, ChainError> {
    let ids: HashSet<&str> = steps.iter().map(|step| step.step_id.as_str()).collect();
    if ids.len() != steps.len() {
        return Err(ChainError::PlanInvalid("duplicate step_id in plan".into()));
    }
    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(ChainError::PlanInvalid(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    step.step_id
                )));
            }
            if dep == &step.step_id {
                return Err(ChainError::PlanInvalid(format!(
                    "step '{}' depends on itself",
                    step.step_id
                )));
            }
        }
    }

    let mut remaining: HashMap<&str, HashSet<&str>> = steps
        .iter()
        .map(|step| {
            (
                step.step_id.as_str(),
                step.depends_on.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    // Within a level, the execution_order hint breaks ties for
    // deterministic dispatch order; it never crosses levels.
    let order_hint: HashMap<&str, u32> = steps
        .iter()
        .map(|step| (step.step_id.as_str(), step.execution_order.unwrap_or(u32::MAX)))
        .collect();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut placed: HashSet<&str> = HashSet::new();

    while placed.len() < steps.len() {
        let mut level: Vec<&str> = remaining
            .iter()
            .filter(|(id, deps)| !placed.contains(**id) && deps.is_subset(&placed))
            .map(|(id, _)| *id)
            .collect();
        if level.is_empty() {
            let stuck: Vec<&str> = remaining
                .keys()
                .filter(|id| !placed.contains(**id))
                .copied()
                .collect();
            return Err(ChainError::PlanInvalid(format!(
                "dependency cycle among steps: {stuck:?}"
            )));
        }
        level.sort_by_key(|id| (order_hint.get(id).copied().unwrap_or(u32::MAX), *id));
        for id in &level {
            placed.insert(*id);
        }
        levels.push(level.into_iter().map(String::from).collect());
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::PlanStep;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        let mut step = PlanStep::new(id, "tool");
        step.depends_on = deps.iter().map(|d| d.to_string()).collect();
        step
    }

    #[test]
    fn roots_land_in_level_zero() {
        let steps = vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a", "b"]),
            step("d", &["c"]),
        ];
        let levels = compute_levels(&steps).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec!["a", "b"]);
        assert_eq!(levels[1], vec!["c"]);
        assert_eq!(levels[2], vec!["d"]);
    }

    #[test]
    fn diamond_resolves_to_three_levels() {
        let steps = vec![
            step("root", &[]),
            step("left", &["root"]),
            step("right", &["root"]),
            step("join", &["left", "right"]),
        ];
        let levels = compute_levels(&steps).unwrap();
        assert_eq!(levels[1], vec!["left", "right"]);
        assert_eq!(levels[2], vec!["join"]);
    }

    #[test]
    fn cycle_is_plan_invalid() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(matches!(
            compute_levels(&steps),
            Err(ChainError::PlanInvalid(_))
        ));
    }

    #[test]
    fn self_dependency_is_plan_invalid() {
        let steps = vec![step("a", &["a"])];
        assert!(matches!(
            compute_levels(&steps),
            Err(ChainError::PlanInvalid(_))
        ));
    }

    #[test]
    fn unknown_dependency_is_plan_invalid() {
        let steps = vec![step("a", &["ghost"])];
        assert!(matches!(
            compute_levels(&steps),
            Err(ChainError::PlanInvalid(_))
        ));
    }

    #[test]
    fn execution_order_hint_breaks_level_ties() {
        let mut first = step("zz", &[]);
        first.execution_order = Some(1);
        let mut second = step("aa", &[]);
        second.execution_order = Some(2);
        let levels = compute_levels(&[first, second]).unwrap();
        assert_eq!(levels[0], vec!["zz", "aa"]);
    }
}
