use cadence_core::{EventKind, KeyPattern, QueryKey, RealtimeEvent};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_kind() -> impl Strategy<Value = EventKind> {
    prop::sample::select(EventKind::all().to_vec())
}

proptest! {
    // Decoding never panics, whatever the frame contains.
    #[test]
    fn decode_never_panics(frame in ".*") {
        let _ = RealtimeEvent::decode(&frame);
    }

    // Plain words (heartbeat acks and the like) never decode to an event.
    #[test]
    fn bare_words_are_discarded(word in "[a-z]{1,12}") {
        prop_assume!(word != "true" && word != "false" && word != "null");
        prop_assert!(RealtimeEvent::decode(&word).is_err());
    }

    #[test]
    fn encoded_events_decode_to_themselves(
        kind in arb_kind(),
        title in proptest::option::of("[A-Za-z ]{0,20}"),
    ) {
        let mut event = RealtimeEvent::new(kind);
        if let Some(title) = title {
            let mut data = Map::new();
            data.insert("title".to_string(), Value::String(title));
            event = event.with_data(data);
        }
        let frame = event.to_frame().unwrap();
        prop_assert_eq!(RealtimeEvent::decode(&frame).unwrap(), event);
    }

    #[test]
    fn resource_pattern_matches_any_params(
        resource in "[a-z-]{1,12}",
        params in prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 0..4),
    ) {
        let mut key = QueryKey::new(resource.clone());
        for (name, value) in &params {
            key = key.with_param(name.clone(), value.clone());
        }
        prop_assert!(KeyPattern::resource(resource).matches(&key));
        prop_assert!(KeyPattern::key(&key).matches(&key));
    }
}
