use std::collections::HashMap;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use companion_session::{InboundEvent, Message, MessageId, Transcript};

// --- Event generators ---

fn arb_text() -> impl Strategy<Value = String> {
    "[a-z !]{0,5}"
}

fn arb_tag() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z_]{1,8}")
}

fn arb_event() -> impl Strategy<Value = InboundEvent> {
    prop_oneof![
        4 => arb_text().prop_map(|content| InboundEvent::Stream { content }),
        2 => (proptest::option::of(arb_text()), arb_tag(), arb_tag()).prop_map(
            |(content, intent, emotion_color)| InboundEvent::End {
                content,
                intent,
                emotion_color,
            }
        ),
        1 => (arb_text(), arb_tag())
            .prop_map(|(content, intent)| InboundEvent::Greeting { content, intent }),
        1 => (arb_text(), arb_tag())
            .prop_map(|(content, intent)| InboundEvent::NamingPrompt { content, intent }),
        1 => (arb_text(), arb_tag())
            .prop_map(|(content, intent)| InboundEvent::Announcement { content, intent }),
        1 => arb_text().prop_map(|content| InboundEvent::NameReveal { content }),
        1 => arb_text().prop_map(|content| InboundEvent::UserNameSet { content }),
    ]
}

fn transcript() -> Transcript {
    Transcript::new("???", "", Duration::from_secs(3))
}

fn finalized(t: &Transcript) -> HashMap<MessageId, Message> {
    t.messages()
        .iter()
        .filter(|m| !m.is_streaming())
        .map(|m| (m.id(), m.clone()))
        .collect()
}

// --- Reducer invariants ---

proptest! {
    #[test]
    fn reducer_invariants_hold_after_every_event(
        events in prop::collection::vec(arb_event(), 0..64)
    ) {
        let mut t = transcript();
        let start = Instant::now();

        for (step, event) in events.into_iter().enumerate() {
            let before = finalized(&t);
            let len_before = t.messages().len();
            let is_name_event = matches!(
                event,
                InboundEvent::NameReveal { .. } | InboundEvent::UserNameSet { .. }
            );

            t.apply(event, start + Duration::from_millis(step as u64));

            let streaming: Vec<_> = t.messages().iter().filter(|m| m.is_streaming()).collect();
            prop_assert!(streaming.len() <= 1);
            prop_assert_eq!(t.active_stream(), streaming.first().map(|m| m.id()));

            for (id, old) in &before {
                prop_assert_eq!(t.get(*id), Some(old));
            }

            prop_assert!(t.messages().windows(2).all(|w| w[0].id() < w[1].id()));
            prop_assert!(t.messages().len() >= len_before);
            if is_name_event {
                prop_assert_eq!(t.messages().len(), len_before);
            }
        }
    }

    #[test]
    fn tokens_between_ends_land_in_one_message(
        tokens in prop::collection::vec(("[a-z]{1,5}", any::<bool>()), 1..24),
        intent in arb_tag(),
    ) {
        let mut t = transcript();
        let now = Instant::now();
        let mut expected = String::new();
        let mut interruptions = 0;

        for (token, interrupt) in tokens {
            if interrupt {
                t.apply(
                    InboundEvent::Announcement {
                        content: "ASIDE".to_string(),
                        intent: None,
                    },
                    now,
                );
                interruptions += 1;
            }
            expected.push_str(&token);
            t.apply(InboundEvent::Stream { content: token }, now);
        }
        t.apply(
            InboundEvent::End {
                content: None,
                intent: intent.clone(),
                emotion_color: None,
            },
            now,
        );

        prop_assert_eq!(t.active_stream(), None);
        prop_assert_eq!(t.messages().len(), 1 + interruptions);
        let replies: Vec<_> = t
            .messages()
            .iter()
            .filter(|m| m.text() != "ASIDE")
            .collect();
        prop_assert_eq!(replies.len(), 1);
        prop_assert_eq!(replies[0].text(), expected.as_str());
        prop_assert_eq!(replies[0].intent(), intent.as_deref());
        prop_assert!(!replies[0].is_streaming());
    }
}
