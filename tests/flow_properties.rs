//! Properties of the pure flow state machine over generated answers.

use proptest::prelude::*;
use serde_json::json;

use coach_core::domain::flow::{
    builtin, FlowDefinition, FlowInstance, FlowStatus, RawInput, Submission,
};
use coach_core::domain::foundation::{Timestamp, UserId};

fn user() -> UserId {
    UserId::new("prop-user").unwrap()
}

fn advance(instance: &FlowInstance, definition: &FlowDefinition, text: &str) -> FlowInstance {
    match instance
        .submit(definition, &RawInput::from(text), Timestamp::now())
        .unwrap()
    {
        Submission::Advanced { instance, .. } => instance,
        Submission::Rejected { errors } => panic!("'{text}' rejected: {errors:?}"),
    }
}

fn out_of_scale() -> impl Strategy<Value = i64> {
    prop_oneof![-1000i64..1, 6i64..1000]
}

proptest! {
    // Any valid check-in completes, keeps data in submission order and
    // bumps the version once per step.
    #[test]
    fn valid_check_in_completes_in_order(
        mood in 1i64..=5,
        energy in 1i64..=5,
        highlight in "[a-z]{1,20}( [a-z]{1,20}){0,4}",
        blocker in "[a-z]{1,20}",
    ) {
        let definition = builtin::check_in().unwrap();
        let mut instance = FlowInstance::begin(&definition, user(), Timestamp::now());

        for answer in [mood.to_string(), energy.to_string(), highlight.clone(), blocker.clone()] {
            prop_assert!(instance.is_active());
            instance = advance(&instance, &definition, &answer);
        }

        prop_assert_eq!(instance.status(), FlowStatus::Completed);
        prop_assert_eq!(instance.version(), 5);
        prop_assert_eq!(
            instance.data().field_names(),
            vec!["mood", "energy", "highlight", "blocker"]
        );
        prop_assert_eq!(instance.data().get("mood"), Some(&json!(mood)));
        prop_assert_eq!(instance.data().get("highlight"), Some(&json!(highlight)));
        prop_assert_eq!(
            instance.pending_skill().map(|p| p.skill.as_str()),
            Some("record_check_in")
        );
    }

    // A rejected answer reports errors and leaves nothing to persist.
    #[test]
    fn out_of_range_scale_is_rejected(mood in out_of_scale()) {
        let definition = builtin::check_in().unwrap();
        let instance = FlowInstance::begin(&definition, user(), Timestamp::now());
        let before = instance.clone();

        let submission = instance
            .submit(&definition, &RawInput::from(mood.to_string().as_str()), Timestamp::now())
            .unwrap();

        let rejected = matches!(submission, Submission::Rejected { ref errors } if !errors.is_empty());
        prop_assert!(rejected);
        prop_assert_eq!(instance, before);
    }

    #[test]
    fn non_numeric_scale_is_rejected(text in "[a-z ]{1,12}") {
        let definition = builtin::check_in().unwrap();
        let instance = FlowInstance::begin(&definition, user(), Timestamp::now());

        let submission = instance
            .submit(&definition, &RawInput::from(text.as_str()), Timestamp::now())
            .unwrap();

        let rejected = matches!(submission, Submission::Rejected { .. });
        prop_assert!(rejected);
    }

    // Priorities are stored as a list in the order they were typed.
    #[test]
    fn priorities_keep_their_order(
        items in prop::collection::btree_set("[a-z]{3,10}", 1..=5),
    ) {
        let items: Vec<String> = items.into_iter().collect();
        let definition = builtin::weekly_plan().unwrap();
        let instance = FlowInstance::begin(&definition, user(), Timestamp::now());

        let next = advance(&instance, &definition, &items.join(", "));

        prop_assert_eq!(next.current_step().as_str(), "commitment");
        prop_assert_eq!(next.data().get("priorities"), Some(&json!(items)));
    }

    #[test]
    fn too_many_priorities_are_rejected(
        items in prop::collection::btree_set("[a-z]{3,10}", 6..=10),
    ) {
        let items: Vec<String> = items.into_iter().collect();
        let definition = builtin::weekly_plan().unwrap();
        let instance = FlowInstance::begin(&definition, user(), Timestamp::now());

        let submission = instance
            .submit(&definition, &RawInput::from(items.join(", ").as_str()), Timestamp::now())
            .unwrap();

        let rejected = matches!(submission, Submission::Rejected { .. });
        prop_assert!(rejected);
        prop_assert!(instance.data().is_empty());
    }
}
