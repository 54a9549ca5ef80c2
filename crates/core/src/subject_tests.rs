// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn subj(s: &str) -> Subject {
    Subject::parse(s).unwrap()
}

fn pat(p: &str) -> SubjectPattern {
    SubjectPattern::parse(p).unwrap()
}

#[parameterized(
    exact = { "relay.agent.foo", "relay.agent.foo", true },
    exact_mismatch = { "relay.agent.foo", "relay.agent.bar", false },
    star_one_segment = { "relay.*.foo", "relay.agent.foo", true },
    star_is_not_two = { "relay.*", "relay.agent.foo", false },
    star_requires_segment = { "relay.agent.*", "relay.agent", false },
    tail_one = { "relay.agent.>", "relay.agent.foo", true },
    tail_many = { "relay.agent.>", "relay.agent.foo.bar.baz", true },
    tail_requires_one = { "relay.agent.>", "relay.agent", false },
    tail_alone = { ">", "anything", true },
    prefix_mismatch = { "relay.>", "pulse.tick", false },
    shorter_subject = { "relay.agent.foo", "relay.agent", false },
    longer_subject = { "relay.agent", "relay.agent.foo", false },
    star_then_tail = { "relay.*.>", "relay.agent.a.b", true },
)]
fn matching(pattern: &str, subject: &str, expected: bool) {
    assert_eq!(pat(pattern).matches(&subj(subject)), expected);
}

#[test]
fn subject_rejects_wildcards() {
    assert!(matches!(
        Subject::parse("relay.*.foo"),
        Err(SubjectError::WildcardInSubject(_))
    ));
    assert!(matches!(
        Subject::parse("relay.>"),
        Err(SubjectError::WildcardInSubject(_))
    ));
}

#[parameterized(
    empty = { "" },
    leading_dot = { ".relay" },
    trailing_dot = { "relay." },
    double_dot = { "relay..agent" },
    spacey = { "relay.a b" },
)]
fn invalid_subjects_rejected(raw: &str) {
    assert!(Subject::parse(raw).is_err());
    assert!(SubjectPattern::parse(raw).is_err());
}

#[test]
fn mid_pattern_tail_wildcard_is_invalid() {
    assert!(matches!(
        SubjectPattern::parse("a.>.c"),
        Err(SubjectError::TailWildcardNotLast(_))
    ));
}

#[test]
fn last_segment_and_dlq() {
    assert_eq!(subj("relay.agent.sess-1").last_segment(), "sess-1");
    assert!(subj("relay.system.pulse.dlq").is_dead_letter());
    assert!(!subj("relay.system.pulse").is_dead_letter());
}

#[test]
fn serde_round_trip() {
    let s = subj("relay.agent.foo");
    let json = serde_json::to_string(&s).unwrap();
    assert_eq!(json, "\"relay.agent.foo\"");
    assert_eq!(serde_json::from_str::<Subject>(&json).unwrap(), s);
    assert!(serde_json::from_str::<Subject>("\"relay..x\"").is_err());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,6}"
    }

    fn subject_parts() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(segment(), 1..5)
    }

    proptest! {
        /// A literal pattern matches exactly its own subject.
        #[test]
        fn literal_pattern_matches_self(parts in subject_parts()) {
            let raw = parts.join(".");
            let s = Subject::parse(&raw).unwrap();
            let p = SubjectPattern::parse(&raw).unwrap();
            prop_assert!(p.matches(&s));
        }

        /// `prefix.>` matches any subject strictly below the prefix.
        #[test]
        fn tail_wildcard_matches_descendants(
            prefix in subject_parts(),
            rest in subject_parts(),
        ) {
            let p = SubjectPattern::parse(&format!("{}.>", prefix.join("."))).unwrap();
            let below = Subject::parse(&format!("{}.{}", prefix.join("."), rest.join("."))).unwrap();
            let exact = Subject::parse(&prefix.join(".")).unwrap();
            prop_assert!(p.matches(&below));
            prop_assert!(!p.matches(&exact));
        }

        /// Replacing any one segment of a subject with `*` still matches.
        #[test]
        fn star_replacement_matches(parts in subject_parts(), idx in 0usize..5) {
            let idx = idx % parts.len();
            let s = Subject::parse(&parts.join(".")).unwrap();
            let mut pat_parts = parts.clone();
            pat_parts[idx] = "*".to_string();
            let p = SubjectPattern::parse(&pat_parts.join(".")).unwrap();
            prop_assert!(p.matches(&s));
        }
    }
}
