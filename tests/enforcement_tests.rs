// tests/enforcement_tests.rs
use chrono::{DateTime, TimeZone, Utc};
use keyword_sentinel::coordinator::{Decision, EnforcementCoordinator};
use keyword_sentinel::error::EngineError;
use keyword_sentinel::escalation::{BanPolicy, BanState, BanStatus};
use keyword_sentinel::matcher::KeywordSet;
use keyword_sentinel::model::{GroupConfig, GroupId, IncomingMessage, Keyword, LimitKind, UserId};
use keyword_sentinel::ratelimit::LimitVerdict;

const G: GroupId = GroupId(-100_500);
const U: UserId = UserId(42);

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn msg(text: &str, at: i64) -> IncomingMessage {
    IncomingMessage::new(G, U, Some(text.to_string()), t(at))
}

fn strict() -> GroupConfig {
    GroupConfig {
        message_limit: 2,
        message_window_secs: 10,
        ..Default::default()
    }
}

fn coordinator() -> EnforcementCoordinator {
    EnforcementCoordinator::new(BanPolicy::default()).unwrap()
}

#[test]
fn third_message_in_window_bans_once() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    let verdicts: Vec<LimitVerdict> = ["one", "two", "three"]
        .iter()
        .enumerate()
        .map(|(i, text)| c.process(&msg(text, i as i64), &kw, &cfg).unwrap().verdict())
        .collect();

    assert_eq!(verdicts[0], LimitVerdict::Ok);
    assert_eq!(verdicts[1], LimitVerdict::Ok);
    assert_eq!(
        verdicts[2],
        LimitVerdict::Exceeded { kind: LimitKind::Message, count: 3, limit: 2 }
    );

    assert_eq!(c.escalator().state(G, U).unwrap().violation_count, 1);

    // still banned: no second violation counted
    let eval = c.process(&msg("four", 3), &kw, &cfg).unwrap();
    assert!(eval.banned);
    assert!(eval.ban_notice().is_none());
    assert_eq!(c.escalator().state(G, U).unwrap().violation_count, 1);
}

#[test]
fn messages_outside_window_do_not_count() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    for (i, at) in [0, 5, 11, 16].into_iter().enumerate() {
        let eval = c.process(&msg(&format!("m{i}"), at), &kw, &cfg).unwrap();
        assert_eq!(eval.verdict(), LimitVerdict::Ok, "message at t={at}");
    }
}

#[test]
fn ban_durations_escalate_after_expiry() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    let mut notices = Vec::new();
    // three bursts, each after the previous ban ran out
    for start in [0, 100, 1_000] {
        for i in 0..3 {
            let eval = c.process(&msg(&format!("b{start}-{i}"), start + i), &kw, &cfg).unwrap();
            if let Some(n) = eval.ban_notice() {
                notices.push(n.clone());
            }
        }
    }

    let durations: Vec<i64> = notices.iter().map(|n| n.duration_secs).collect();
    assert_eq!(durations, vec![60, 300, 1_500]);
    let counts: Vec<u32> = notices.iter().map(|n| n.violation_count).collect();
    assert_eq!(counts, vec![1, 2, 3]);
    assert_eq!(notices[0].expires_at, t(2 + 60));
}

#[test]
fn ban_duration_is_capped() {
    let policy = BanPolicy { base_secs: 60, multiplier: 10.0, max_secs: Some(3_600) };
    assert_eq!(policy.duration_for(0).num_seconds(), 60);
    assert_eq!(policy.duration_for(1).num_seconds(), 600);
    assert_eq!(policy.duration_for(2).num_seconds(), 3_600);
    assert_eq!(policy.duration_for(50).num_seconds(), 3_600);
}

#[test]
fn unban_keeps_history_and_is_noop_when_clear() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    assert!(!c.unban(G, U));

    for i in 0..3 {
        c.process(&msg(&format!("x{i}"), i), &kw, &cfg).unwrap();
    }
    assert!(c.status(G, U, t(3)).unwrap().is_banned());

    assert!(c.unban(G, U));
    assert_eq!(c.status(G, U, t(3)).unwrap(), BanStatus::Clear);
    assert!(!c.unban(G, U));

    // next offence continues the escalation
    let mut notice = None;
    for i in 0..3 {
        let eval = c.process(&msg(&format!("y{i}"), 100 + i), &kw, &cfg).unwrap();
        notice = notice.or(eval.ban_notice().cloned());
    }
    let notice = notice.expect("second ban");
    assert_eq!(notice.violation_count, 2);
    assert_eq!(notice.duration_secs, 300);
}

#[test]
fn forgive_resets_escalation() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    for i in 0..3 {
        c.process(&msg(&format!("x{i}"), i), &kw, &cfg).unwrap();
    }
    assert!(c.forgive(G, U));
    assert!(c.escalator().state(G, U).is_none());
    assert_eq!(c.limiter().tracked_members(), 0);

    let mut notice = None;
    for i in 0..3 {
        let eval = c.process(&msg(&format!("y{i}"), 10 + i), &kw, &cfg).unwrap();
        notice = notice.or(eval.ban_notice().cloned());
    }
    assert_eq!(notice.expect("ban").duration_secs, 60);
}

#[test]
fn repeated_content_streak() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = GroupConfig { message_limit: 100, ..Default::default() };

    for i in 0..3 {
        let eval = c.process(&msg("BUY NOW", i), &kw, &cfg).unwrap();
        assert_eq!(eval.verdict(), LimitVerdict::Ok);
    }
    // different text resets the streak
    c.process(&msg("something else", 3), &kw, &cfg).unwrap();
    for i in 4..7 {
        let eval = c.process(&msg("buy   now", i), &kw, &cfg).unwrap();
        assert_eq!(eval.verdict(), LimitVerdict::Ok);
    }
    let eval = c.process(&msg("Buy now", 7), &kw, &cfg).unwrap();
    assert_eq!(
        eval.verdict(),
        LimitVerdict::Exceeded { kind: LimitKind::RepeatedContent, count: 4, limit: 3 }
    );
    assert_eq!(eval.ban_notice().map(|n| n.kind), Some(LimitKind::RepeatedContent));
}

#[test]
fn non_text_message_breaks_repeat_streak() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = GroupConfig { repeat_limit: 2, message_limit: 100, ..Default::default() };

    c.process(&msg("spam", 0), &kw, &cfg).unwrap();
    c.process(&msg("spam", 1), &kw, &cfg).unwrap();
    let sticker = IncomingMessage::new(G, U, None, t(2));
    assert_eq!(c.process(&sticker, &kw, &cfg).unwrap().verdict(), LimitVerdict::Ok);
    let eval = c.process(&msg("spam", 3), &kw, &cfg).unwrap();
    assert_eq!(eval.verdict(), LimitVerdict::Ok);
    assert!(!eval.banned);

    // whitespace-only text behaves the same
    c.process(&msg("spam", 4), &kw, &cfg).unwrap();
    c.process(&msg("   ", 5), &kw, &cfg).unwrap();
    assert_eq!(c.process(&msg("spam", 6), &kw, &cfg).unwrap().verdict(), LimitVerdict::Ok);
}

#[test]
fn link_spam_counts_each_link() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = GroupConfig { link_limit: 3, ..Default::default() };

    let eval = c.process(&msg("https://a.io https://b.io", 0), &kw, &cfg).unwrap();
    assert_eq!(eval.verdict(), LimitVerdict::Ok);
    let eval = c.process(&msg("see t.me/x and www.c.io", 1), &kw, &cfg).unwrap();
    assert_eq!(
        eval.verdict(),
        LimitVerdict::Exceeded { kind: LimitKind::Link, count: 4, limit: 3 }
    );
}

#[test]
fn non_text_messages_count_only_as_messages() {
    let c = coordinator();
    let kw = KeywordSet::new(vec![Keyword::text(1, "*", "anything")]);
    let cfg = strict();

    let sticker = IncomingMessage::new(G, U, None, t(0));
    let eval = c.process(&sticker, &kw, &cfg).unwrap();
    assert_eq!(eval.verdicts, vec![LimitVerdict::Ok]);
    assert!(eval.decisions.is_empty());
}

#[test]
fn replies_suppressed_while_banned_unless_configured() {
    let kw = KeywordSet::new(vec![Keyword::text(7, "hello", "hi there")]);

    let c = coordinator();
    let cfg = strict();
    for i in 0..2 {
        let eval = c.process(&msg(&format!("hello {i}"), i), &kw, &cfg).unwrap();
        assert!(eval.reply().is_some());
    }
    let eval = c.process(&msg("hello 2", 2), &kw, &cfg).unwrap();
    assert!(eval.banned);
    assert!(eval.reply().is_none());
    assert_eq!(eval.decisions.len(), 1);

    let c = coordinator();
    let cfg = GroupConfig { suppress_banned_replies: false, ..strict() };
    for i in 0..2 {
        c.process(&msg(&format!("hello {i}"), i), &kw, &cfg).unwrap();
    }
    let eval = c.process(&msg("hello 2", 2), &kw, &cfg).unwrap();
    assert!(eval.banned);
    assert!(matches!(eval.decisions[..], [Decision::Ban(_), Decision::Reply { keyword_id: 7, .. }]));
}

#[test]
fn groups_and_users_are_independent() {
    let c = coordinator();
    let kw = KeywordSet::default();
    let cfg = strict();

    for i in 0..3 {
        c.process(&msg(&format!("x{i}"), i), &kw, &cfg).unwrap();
    }
    let other_group = IncomingMessage::new(GroupId(1), U, Some("x".into()), t(3));
    let other_user = IncomingMessage::new(G, UserId(43), Some("x".into()), t(3));
    assert!(!c.process(&other_group, &kw, &cfg).unwrap().banned);
    assert!(!c.process(&other_user, &kw, &cfg).unwrap().banned);

    let bans = c.active_bans(None, t(3));
    assert_eq!(bans.len(), 1);
    assert_eq!((bans[0].group, bans[0].user), (G, U));
    assert!(c.active_bans(Some(GroupId(1)), t(3)).is_empty());
    assert!(c.active_bans(None, t(1_000)).is_empty());
}

#[test]
fn inconsistent_ban_record_is_reported() {
    let c = coordinator();
    c.escalator().restore(
        G,
        U,
        BanState {
            banned: true,
            expires_at: Some(t(100)),
            violation_count: 0,
            last_violation: None,
        },
    );
    let err = c.status(G, U, t(0)).unwrap_err();
    assert!(matches!(err, EngineError::InconsistentBanState { group, user } if group == G && user == U));
}
