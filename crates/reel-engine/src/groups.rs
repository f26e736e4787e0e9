use std::sync::Arc;

use crate::evaluator::EvaluatorFactory;

/// A thread-scoped contiguous slice of the evaluator chain.
pub type FactoryGroup = Vec<Arc<dyn EvaluatorFactory>>;

/// Partitions the evaluator chain into thread groups along its `can_overlap`
/// endpoints so an overlappable decoder or save-prep stage pipelines with the
/// compute-heavy middle on a different device. Yields between one and three
/// non-empty groups; each group runs in its own thread per processing unit,
/// linked by queues.
pub fn group_factories(factories: &[Arc<dyn EvaluatorFactory>]) -> Vec<FactoryGroup> {
    if factories.len() <= 1 {
        return vec![factories.to_vec()];
    }

    let front = &factories[0];
    let back = &factories[factories.len() - 1];
    let middle = &factories[1..factories.len() - 1];

    let mut groups: Vec<FactoryGroup> = Vec::new();
    if front.capabilities().can_overlap {
        groups.push(vec![front.clone()]);
        groups.push(middle.to_vec());
    } else {
        let mut main = vec![front.clone()];
        main.extend(middle.iter().cloned());
        groups.push(main);
    }

    if back.capabilities().can_overlap {
        groups.push(vec![back.clone()]);
    } else if let Some(last) = groups.last_mut() {
        last.push(back.clone());
    }

    groups.retain(|g| !g.is_empty());
    groups
}
