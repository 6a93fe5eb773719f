mod common;

use chrono::{Datelike, Timelike};
use common::{alt, chat_fixture, immediate_resolver, init_logger, FakePage};
use task_scout::scraping::browser_session::WHATSAPP_WEB_URL;
use task_scout::scraping::message_extractor::MessageExtractor;
use task_scout::scraping::navigator::{ConversationNavigator, NavigatorTimings};
use task_scout::scraping::selectors::SelectorKey;
use task_scout::{SELF_SENDER, UNKNOWN_SENDER};

#[tokio::test]
async fn test_open_conversation_types_and_clicks_result() {
    init_logger();
    let fx = chat_fixture("Ops Team", &[]);
    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());

    assert!(nav.open_conversation(&fx.page, "Ops Team").await);
    assert_eq!(fx.page.typed(), vec!["Ops Team".to_string()]);
    assert_eq!(fx.page.clicks(), vec![fx.contact]);

    assert!(nav.close_conversation(&fx.page).await);
    assert_eq!(fx.page.clicks().last(), Some(&fx.back));
}

#[tokio::test]
async fn test_open_conversation_false_when_nothing_matches() {
    let fx = chat_fixture("Ops Team", &[]);
    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());

    assert!(!nav.open_conversation(&fx.page, "Nobody").await);
    assert!(fx.page.clicks().is_empty());
}

#[tokio::test]
async fn test_open_conversation_false_without_search_box() {
    let page = FakePage::new();
    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());

    assert!(!nav.open_conversation(&page, "Ops Team").await);
    assert!(page.typed().is_empty());
}

#[tokio::test]
async fn test_stale_result_falls_back_to_row_scan() {
    let fx = chat_fixture("Ops Team", &[]);
    fx.page.make_stale(fx.contact);
    let row = fx.page.node("Ops Team\nlast message", &[("role", "listitem")], None);
    fx.page
        .on(None, &alt(SelectorKey::ChatRow, 0, &[]), &[row]);

    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());
    assert!(nav.open_conversation(&fx.page, "ops team").await);
    assert_eq!(fx.page.clicks(), vec![row]);
}

#[tokio::test]
async fn test_ancestor_walk_finds_row_like_parent() {
    let page = FakePage::new();
    let search = page.node("", &[], None);
    page.on(None, &alt(SelectorKey::SearchInput, 0, &[]), &[search]);
    let row = page.node("", &[("tabindex", "-1")], None);
    let inner = page.node("", &[], Some(row));
    let span = page.node("Family", &[], Some(inner));
    page.on(None, r#"//span[contains(text(),"Family")]"#, &[span]);
    // The span itself is not clickable; only its row is.
    page.make_stale(span);

    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());
    assert!(nav.open_conversation(&page, "Family").await);
    assert_eq!(page.clicks(), vec![row]);
}

#[tokio::test]
async fn test_reset_returns_to_landing_page() {
    let fx = chat_fixture("Ops Team", &[]);
    let resolver = immediate_resolver();
    let nav = ConversationNavigator::new(&resolver, NavigatorTimings::none());
    assert!(nav.reset(&fx.page).await);
    assert_eq!(fx.page.navigations(), vec![WHATSAPP_WEB_URL.to_string()]);
}

#[tokio::test]
async fn test_extract_keeps_most_recent_tail_in_order() {
    let msgs: Vec<String> = (1..=5).map(|i| format!("message number {i}")).collect();
    let bubbles: Vec<(Option<&str>, &str, bool)> = msgs
        .iter()
        .map(|m| (Some("[09:15, 18/10/2026] Alice: "), m.as_str(), false))
        .collect();
    let fx = chat_fixture("Ops Team", &bubbles);
    let resolver = immediate_resolver();

    let out = MessageExtractor::new(&resolver)
        .extract_messages(&fx.page, "Ops Team", 3)
        .await;
    let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["message number 3", "message number 4", "message number 5"]
    );
    assert!(out.iter().all(|m| m.sender == "Alice" && m.group_name == "Ops Team"));
    let ts = out[0].timestamp.with_timezone(&chrono::Local);
    assert_eq!((ts.day(), ts.month(), ts.year()), (18, 10, 2026));
    assert_eq!(ts.minute(), 15);
}

#[tokio::test]
async fn test_extract_zero_max_yields_nothing() {
    let fx = chat_fixture("Ops Team", &[(None, "hello there", false)]);
    let resolver = immediate_resolver();
    let out = MessageExtractor::new(&resolver)
        .extract_messages(&fx.page, "Ops Team", 0)
        .await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_extract_sender_sentinels_and_empty_bubbles() {
    let fx = chat_fixture(
        "Ops Team",
        &[
            (None, "who wrote this one", false),
            (None, "", false),
            (Some("[10:00, 18/10/2026] Me: "), "sent by me", true),
        ],
    );
    let resolver = immediate_resolver();
    let out = MessageExtractor::new(&resolver)
        .extract_messages(&fx.page, "Ops Team", 50)
        .await;

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].sender, UNKNOWN_SENDER);
    assert_eq!(out[0].text, "who wrote this one");
    assert_eq!(out[1].sender, SELF_SENDER);
}

#[tokio::test]
async fn test_extract_reconstructs_wrappers_from_leaf_text() {
    let page = FakePage::new();
    let bubble_a = page.node("first bubble", &[("data-id", "a")], None);
    let leaf_a1 = page.node("first", &[], Some(bubble_a));
    let leaf_a2 = page.node("bubble", &[], Some(bubble_a));
    let bubble_b = page.node("second bubble", &[("data-id", "b")], None);
    let leaf_b = page.node("second bubble", &[], Some(bubble_b));
    page.on(
        None,
        &alt(SelectorKey::MessageLeafText, 0, &[]),
        &[leaf_a1, leaf_a2, leaf_b],
    );

    let resolver = immediate_resolver();
    let out = MessageExtractor::new(&resolver)
        .extract_messages(&page, "Ops Team", 50)
        .await;
    let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first bubble", "second bubble"]);
}

#[tokio::test]
async fn test_reconstruction_keeps_identical_bubbles_apart() {
    let page = FakePage::new();
    let first = page.node("ok", &[("class", "message-in")], None);
    let first_leaf = page.node("ok", &[], Some(first));
    let second = page.node("ok", &[("class", "message-in")], None);
    let second_leaf = page.node("ok", &[], Some(second));
    page.on(
        None,
        &alt(SelectorKey::MessageLeafText, 0, &[]),
        &[first_leaf, second_leaf],
    );

    let resolver = immediate_resolver();
    let out = MessageExtractor::new(&resolver)
        .extract_messages(&page, "Ops Team", 50)
        .await;
    let texts: Vec<&str> = out.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["ok", "ok"]);
}
