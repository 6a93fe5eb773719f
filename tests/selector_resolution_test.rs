mod common;

use common::{alt, immediate_resolver, init_logger, FakePage};
use std::time::Duration;
use task_scout::scraping::selectors::{
    QueryTemplate, Resolution, ResolveOptions, Resolver, SelectorKey, SelectorTable,
};
use task_scout::tools::diagnose::probe_selectors;

#[tokio::test]
async fn test_falls_through_to_third_alternative() {
    init_logger();
    let page = FakePage::new();
    let list = page.node("chats", &[("id", "pane-side")], None);

    // #0 errors, #1 is empty, #2 matches.
    page.fail(&alt(SelectorKey::ChatList, 0, &[]));
    page.on(None, &alt(SelectorKey::ChatList, 2, &[]), &[list]);

    let resolver = immediate_resolver();
    let found = resolver
        .resolve(&page, SelectorKey::ChatList, &[])
        .await
        .found()
        .expect("third alternative should match");
    assert_eq!(found.id(), list);

    assert_eq!(
        page.queries(),
        vec![
            alt(SelectorKey::ChatList, 0, &[]),
            alt(SelectorKey::ChatList, 1, &[]),
            alt(SelectorKey::ChatList, 2, &[]),
        ]
    );
    assert_eq!(resolver.probe(&page, SelectorKey::ChatList, &[]).await, Some(2));
}

#[tokio::test]
async fn test_not_found_after_every_alternative() {
    let page = FakePage::new();
    let resolver = immediate_resolver();
    let res = resolver.resolve(&page, SelectorKey::BackButton, &[]).await;
    assert!(!res.is_found());
    assert_eq!(
        page.queries().len(),
        SelectorTable::whatsapp_web()
            .alternatives(SelectorKey::BackButton)
            .len()
    );
}

#[tokio::test]
async fn test_earlier_alternative_wins_over_later() {
    let page = FakePage::new();
    let a = page.node("a", &[], None);
    let b = page.node("b", &[], None);
    page.on(None, &alt(SelectorKey::SearchInput, 1, &[]), &[a]);
    page.on(None, &alt(SelectorKey::SearchInput, 4, &[]), &[b]);

    let resolver = immediate_resolver();
    let Resolution::Found(el) = resolver.resolve(&page, SelectorKey::SearchInput, &[]).await else {
        panic!("expected a match");
    };
    assert_eq!(el.id(), a);
}

#[tokio::test]
async fn test_scoped_resolution_ignores_page_level_matches() {
    let page = FakePage::new();
    let bubble = page.node("hi", &[], None);
    let stray = page.node("stray", &[], None);
    let q = alt(SelectorKey::MessageText, 0, &[]);
    page.on(None, &q, &[stray]);

    let resolver = immediate_resolver();
    let scope = page.handle(bubble);
    let res = resolver
        .resolve_in(&page, &scope, SelectorKey::MessageText, &[], ResolveOptions::immediate())
        .await;
    assert!(!res.is_found());
}

#[tokio::test]
async fn test_templated_name_is_quoted() {
    let page = FakePage::new();
    let resolver = immediate_resolver();
    let _ = resolver
        .resolve(&page, SelectorKey::ContactByName, &[("name", "Bob's \"crew\"")])
        .await;
    assert!(page.queries()[0].contains("concat("));
}

#[tokio::test]
async fn test_waits_for_late_element_within_budget() {
    let page = FakePage::new();
    let late = page.node("late", &[], None);
    let mut table = SelectorTable::empty();
    table.set(SelectorKey::ChatList, vec![QueryTemplate::css("#late")]);
    let resolver = Resolver::new(
        table,
        ResolveOptions {
            per_entry: Duration::from_millis(500),
            ceiling: Duration::from_secs(1),
            poll: Duration::from_millis(20),
        },
    );

    let delayed = page.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        delayed.on(None, "#late", &[late]);
    });

    let found = resolver.resolve(&page, SelectorKey::ChatList, &[]).await;
    assert!(found.is_found());
    assert!(page.queries().len() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_bounds_total_wait_across_alternatives() {
    let page = FakePage::new();
    let templates: Vec<QueryTemplate> = (0..5)
        .map(|i| QueryTemplate::css(&format!("#missing-{i}")))
        .collect();
    let mut table = SelectorTable::empty();
    table.set(SelectorKey::ChatList, templates);
    // Five alternatives at 200ms each would wait a full second.
    let resolver = Resolver::new(
        table,
        ResolveOptions {
            per_entry: Duration::from_millis(200),
            ceiling: Duration::from_millis(300),
            poll: Duration::from_millis(50),
        },
    );

    let started = tokio::time::Instant::now();
    let res = resolver.resolve(&page, SelectorKey::ChatList, &[]).await;
    assert!(!res.is_found());
    assert!(started.elapsed() <= Duration::from_millis(300));

    // Alternatives past the ceiling still get a single look.
    let queries = page.queries();
    for i in 0..5 {
        assert!(queries.contains(&format!("#missing-{i}")));
    }
}

#[tokio::test]
async fn test_diagnose_probe_reports_matching_index() {
    let page = FakePage::new();
    let qr = page.node("", &[], None);
    page.on(None, &alt(SelectorKey::LandingQr, 1, &[]), &[qr]);

    let probes = probe_selectors(&page, &immediate_resolver(), None).await;
    // ContactByName is skipped without a sample name.
    assert_eq!(probes.len(), SelectorKey::ALL.len() - 1);
    let landing = probes.iter().find(|p| p.key == "landing_qr").unwrap();
    assert_eq!(landing.matched, Some(1));
    assert!(probes
        .iter()
        .filter(|p| p.key != "landing_qr")
        .all(|p| p.matched.is_none()));
}
