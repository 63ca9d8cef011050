mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::*;
use kbase_assist::{DegradedReason, KnowledgeAssistant, StartupMode, ValidationWarning};
use kbase_core::types::ActionKind;
use kbase_core::Error;

const SUSPENSION_TICKET: &str = "My domain was suspended and I didn't get any notice. How can I reactivate it?";

async fn open(
    settings: kbase_core::config::Settings,
    completer: Arc<ScriptedCompleter>,
) -> KnowledgeAssistant {
    KnowledgeAssistant::open(settings, Arc::new(KeywordEmbedder::new()), completer, StartupMode::LoadOrBuild)
        .await
        .expect("open")
}

#[tokio::test]
async fn suspension_ticket_escalates_to_abuse_team() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    let escalation = std::fs::read_to_string(fixture_docs().join("escalation_procedures.md")).unwrap();
    write_doc(&settings, "escalation_procedures.md", &escalation);

    let completer = Arc::new(ScriptedCompleter::replying(&[&resolution_json(
        "Suspensions are handled by the Abuse Team. Escalate with the domain name.",
        &["escalation_procedures.md: Domain Suspension"],
        "escalate_to_abuse_team",
    )]));
    let assistant = open(settings, completer.clone()).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.resolution.action, ActionKind::EscalateToAbuseTeam);
    assert!(report.resolution.references.contains(&"escalation_procedures.md".to_string()));
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.degraded, None);

    let prompts = completer.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("[Source: escalation_procedures.md | Domain Suspension]"));
    assert!(prompts[0].user.contains(SUSPENSION_TICKET));
}

#[tokio::test]
async fn empty_corpus_answers_conservatively() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    let completer = Arc::new(ScriptedCompleter::replying(&[
        &resolution_json("Escalating to legal.", &["billing_faq.md"], "escalate_to_legal_team"),
        &resolution_json("Nothing to do.", &[], "no_action_required"),
    ]));
    let assistant = open(settings, completer.clone()).await;
    assert_eq!(assistant.stats().chunk_count, 0);

    let first = assistant.resolve_ticket("Where is my invoice?").await.unwrap();
    assert_eq!(first.action, ActionKind::ContactCustomerDirectly);
    assert!(first.references.is_empty());

    let second = assistant.resolve_ticket("Where is my invoice?").await.unwrap();
    assert_eq!(second.action, ActionKind::NoActionRequired);
    assert!(second.references.is_empty());

    assert!(completer.prompts()[0].user.contains("No relevant documentation was found"));
}

#[tokio::test]
async fn nothing_above_threshold_is_treated_as_no_context() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "ssl.md", "# SSL\nThe certificate is issued automatically by the ssl service.");
    let completer = Arc::new(ScriptedCompleter::replying(&[&resolution_json(
        "Escalate to abuse.",
        &["ssl.md"],
        "escalate_to_abuse_team",
    )]));
    let assistant = open(settings, completer.clone()).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert!(report.resolution.action.is_conservative());
    assert!(report.resolution.references.is_empty());
    assert!(!completer.prompts()[0].user.contains("[Source:"));
    assert!(report.warnings.iter().any(|w| matches!(w, ValidationWarning::ActionRestricted { .. })));
}

#[tokio::test]
async fn unparseable_twice_returns_fallback() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "suspensions.md", "# Suspensions\nA suspended domain is reactivated by the abuse desk.");
    let completer = Arc::new(ScriptedCompleter::replying(&[
        "I think you should escalate this.",
        "Sorry, here it is: action_required = escalate",
    ]));
    let assistant = open(settings, completer.clone()).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.resolution.action, ActionKind::ContactCustomerDirectly);
    assert!(report.resolution.references.is_empty());
    assert_eq!(report.degraded, Some(DegradedReason::UnparseableOutput));

    let prompts = completer.prompts();
    assert_eq!(prompts.len(), 2, "exactly one corrective retry");
    assert!(prompts[1].user.contains("valid structured output only"));
}

#[tokio::test]
async fn corrective_retry_can_recover() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "suspensions.md", "# Suspensions\nA suspended domain is reactivated by the abuse desk.");
    let completer = Arc::new(ScriptedCompleter::replying(&[
        "not json",
        &format!("Here you go: {}", resolution_json("Ask abuse.", &["suspensions.md", "invented.md"], "escalate_to_abuse_team")),
    ]));
    let assistant = open(settings, completer).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.resolution.action, ActionKind::EscalateToAbuseTeam);
    assert_eq!(report.resolution.references, vec!["suspensions.md"]);
    assert_eq!(report.degraded, None);
    assert!(matches!(report.warnings[0], ValidationWarning::CorrectiveRetry { .. }));
    assert!(report.warnings.contains(&ValidationWarning::ReferenceDropped { reference: "invented.md".into() }));
}

#[tokio::test]
async fn only_top_scoring_passages_reach_the_prompt() {
    let tmp = TempDir::new().unwrap();
    let mut settings = settings_in(tmp.path());
    settings.retrieval.max_relevant_chunks = 2;
    // cosine against a pure "suspend" query: 6/sqrt(37)=.986, 5/sqrt(26)=.981, .970, .949, .894
    for (name, suspended, refunds) in [("a.md", 5, 1), ("b.md", 4, 1), ("c.md", 3, 1), ("d.md", 2, 1), ("e.md", 6, 1)] {
        let body = format!("{} {}", "suspended ".repeat(suspended), "refund ".repeat(refunds));
        write_doc(&settings, name, &body);
    }
    let completer = Arc::new(ScriptedCompleter::replying(&[&resolution_json("ok", &[], "no_action_required")]));
    let assistant = open(settings, completer.clone()).await;
    assert_eq!(assistant.stats().chunk_count, 5);

    assistant.resolve_ticket("suspended").await.unwrap();
    let prompt = &completer.prompts()[0];
    assert_eq!(prompt_sources(prompt), vec!["e.md", "a.md"]);
}

#[tokio::test]
async fn empty_ticket_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    let completer = Arc::new(ScriptedCompleter::replying(&[]));
    let assistant = open(settings, completer.clone()).await;

    for ticket in ["", "   \n\t"] {
        let err = assistant.resolve_ticket(ticket).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }
    assert!(completer.prompts().is_empty());
}

#[tokio::test]
async fn completion_outage_degrades_instead_of_failing() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "suspensions.md", "# Suspensions\nA suspended domain is reactivated by the abuse desk.");
    let completer = Arc::new(ScriptedCompleter::new(vec![
        Err(Error::Service("503".into())),
        Err(Error::Service("503".into())),
    ]));
    let assistant = open(settings, completer.clone()).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.degraded, Some(DegradedReason::CompletionUnavailable));
    assert_eq!(report.resolution.action, ActionKind::ContactCustomerDirectly);
    assert!(report.resolution.references.is_empty());
    assert_eq!(completer.prompts().len(), 2, "transport failures are retried up to max_attempts");
}

#[tokio::test]
async fn embedding_outage_degrades_instead_of_failing() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "suspensions.md", "# Suspensions\nA suspended domain is reactivated by the abuse desk.");
    let embedder = Arc::new(KeywordEmbedder::new());
    let completer = Arc::new(ScriptedCompleter::replying(&[]));
    let assistant = KnowledgeAssistant::open(settings, embedder.clone(), completer.clone(), StartupMode::LoadOrBuild)
        .await
        .unwrap();

    embedder.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.degraded, Some(DegradedReason::EmbeddingUnavailable));
    assert_eq!(report.resolution.action, ActionKind::ContactCustomerDirectly);
    assert!(completer.prompts().is_empty());
}

#[tokio::test]
async fn rejected_completion_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let settings = settings_in(tmp.path());
    write_doc(&settings, "suspensions.md", "# Suspensions\nA suspended domain is reactivated by the abuse desk.");
    let completer = Arc::new(ScriptedCompleter::new(vec![Err(Error::from_http_status(
        "completion",
        401,
        "invalid api key",
    ))]));
    let assistant = open(settings, completer.clone()).await;

    let report = assistant.resolve_ticket_report(SUSPENSION_TICKET).await.unwrap();
    assert_eq!(report.degraded, Some(DegradedReason::CompletionUnavailable));
    assert_eq!(report.resolution.action, ActionKind::ContactCustomerDirectly);
    assert_eq!(completer.prompts().len(), 1, "a rejected request is sent once");
}
