//! Fan-out of a classification into retrieval tasks

use crate::state::{Decision, SourceKind};

/// Where a classified cycle goes next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No source needed, draft straight away with state unchanged
    Direct,
    /// One independent task per selected source
    FanOut(Vec<SourceKind>),
}

pub fn dispatch(decision: &Decision) -> Dispatch {
    let mut tasks = Vec::with_capacity(3);
    if decision.needs_visa {
        tasks.push(SourceKind::Visa);
    }
    if decision.needs_web {
        tasks.push(SourceKind::Web);
    }
    if decision.needs_rag {
        tasks.push(SourceKind::Knowledge);
    }

    if tasks.is_empty() {
        Dispatch::Direct
    } else {
        Dispatch::FanOut(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_goes_direct() {
        assert_eq!(dispatch(&Decision::default()), Dispatch::Direct);
    }

    #[test]
    fn test_one_task_per_flag() {
        for mask in 1u8..8 {
            let decision = Decision {
                needs_visa: mask & 1 != 0,
                needs_web: mask & 2 != 0,
                needs_rag: mask & 4 != 0,
                ..Default::default()
            };
            let Dispatch::FanOut(tasks) = dispatch(&decision) else {
                panic!("expected fan-out for mask {mask}");
            };
            assert_eq!(tasks.len(), mask.count_ones() as usize);
            assert_eq!(tasks.contains(&SourceKind::Visa), decision.needs_visa);
            assert_eq!(tasks.contains(&SourceKind::Web), decision.needs_web);
            assert_eq!(tasks.contains(&SourceKind::Knowledge), decision.needs_rag);
        }
    }
}
