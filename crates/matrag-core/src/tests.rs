#[cfg(test)]
mod tests {
    use crate::types::*;
    use chrono::Utc;

    #[test]
    fn ab_test_requires_two_variants() {
        let t = AbTest {
            id: "t1".into(),
            start_date: Utc::now(),
            end_date: Utc::now() + chrono::Duration::days(1),
            variants: vec!["m1".into()],
            traffic_split: vec![1.0],
            status: AbTestStatus::Planned,
            results: Default::default(),
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn ab_test_traffic_split_must_sum_to_one() {
        let t = AbTest {
            id: "t1".into(),
            start_date: Utc::now(),
            end_date: Utc::now() + chrono::Duration::days(1),
            variants: vec!["m1".into(), "m2".into()],
            traffic_split: vec![0.3, 0.3],
            status: AbTestStatus::Planned,
            results: Default::default(),
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn status_transitions_only_move_forward() {
        assert!(AbTestStatus::Planned.can_transition_to(AbTestStatus::Running));
        assert!(AbTestStatus::Running.can_transition_to(AbTestStatus::Concluded));
        assert!(!AbTestStatus::Concluded.can_transition_to(AbTestStatus::Running));
        assert!(!AbTestStatus::Running.can_transition_to(AbTestStatus::Planned));
    }

    #[test]
    fn retrieval_result_detects_duplicate_ids() {
        let r = RetrievalResult {
            materials: vec![
                Material {
                    id: "a".into(),
                    score: 0.9,
                    ..Default::default()
                },
                Material {
                    id: "a".into(),
                    score: 0.5,
                    ..Default::default()
                },
            ],
            metadata: Default::default(),
        };
        assert!(!r.is_well_formed());
    }

    #[test]
    fn retrieval_result_detects_unsorted_order() {
        let r = RetrievalResult {
            materials: vec![
                Material {
                    id: "a".into(),
                    score: 0.1,
                    ..Default::default()
                },
                Material {
                    id: "b".into(),
                    score: 0.9,
                    ..Default::default()
                },
            ],
            metadata: Default::default(),
        };
        assert!(!r.is_well_formed());
    }

    #[test]
    fn store_stats_cold_start_ties_at_zero() {
        let s = StoreStats::default();
        assert_eq!(s.load_score(), 0.0);
    }

    #[test]
    fn store_stats_load_score_grows_with_latency_and_volume() {
        let mut s = StoreStats::default();
        s.record(100);
        let first = s.load_score();
        s.record(100);
        assert!(s.load_score() > first);
    }
}
