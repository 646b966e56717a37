//! Benchmarks for the per-event hot path: rule matching and template
//! rendering.
//!
//! Both run for every incoming message, so they must stay well under a
//! millisecond for a few hundred rules.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};

use beacon_core::{
    Action, ActionRule, InstanceFilter, MessageConfig, PerformerFilter, RuleDraft, Trigger,
    TriggerEvent,
};
use beacon_engine::{match_rules, render, render_action, NoOracle};

/// A mixed rule set: hashtag, keyword and reaction triggers, some scoped.
fn generate_rules(count: usize) -> Vec<ActionRule> {
    (0..count)
        .map(|i| {
            let trigger = match i % 3 {
                0 => Trigger::Hashtag {
                    tags: BTreeSet::from([format!("tag{}", i), "todo".to_string()]),
                },
                1 => Trigger::Keyword {
                    words: BTreeSet::from([format!("keyword{}", i), "invoice".to_string()]),
                },
                _ => Trigger::Reaction {
                    emojis: BTreeSet::from(["🔥".to_string(), "✅".to_string()]),
                },
            };
            let mut draft = RuleDraft::new(
                &format!("rule {}", i),
                trigger,
                Action::SendMessage(MessageConfig {
                    message: "Noted: {{content}} ({{hashtags}})".to_string(),
                    chat_id: None,
                }),
            );
            if i % 5 == 0 {
                draft.instance_filter =
                    InstanceFilter::Exclude(BTreeSet::from(["inst-muted".to_string()]));
            }
            if i % 7 == 0 {
                draft.performer_filter = PerformerFilter::ContactsOnly;
            }
            ActionRule::from_draft(draft, Utc::now()).expect("valid benchmark rule")
        })
        .collect()
}

fn generate_event(index: usize) -> TriggerEvent {
    TriggerEvent::message(
        "inst-main",
        "120363@g.us",
        &format!(
            "Reminder {}: send the invoice to the client before Friday #todo #finance",
            index
        ),
    )
    .with_sender("15550001111@s.whatsapp.net")
}

fn bench_match_rules(c: &mut Criterion) {
    let rules = generate_rules(300);
    let events: Vec<TriggerEvent> = (0..100).map(generate_event).collect();

    let mut group = c.benchmark_group("rule_matching");
    group.sample_size(200);
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("match_300_rules", |b| {
        let mut idx = 0usize;
        b.iter(|| {
            let event = &events[idx % events.len()];
            idx += 1;
            match_rules(event, &rules, &NoOracle).len()
        });
    });

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let event = generate_event(1);
    let rules = generate_rules(1);
    let action = &rules[0].action;

    let mut group = c.benchmark_group("template_rendering");
    group.bench_function("render_string", |b| {
        b.iter(|| render("From {{sender}} in {{chatId}} at {{timestamp}}: {{content}}", &event))
    });
    group.bench_function("render_action", |b| b.iter(|| render_action(action, &event)));
    group.finish();
}

criterion_group!(benches, bench_match_rules, bench_render);
criterion_main!(benches);
