mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use ci_server::notify::StatusState;
use ci_server::pipeline::step::STEP_ERROR_MESSAGE;
use ci_server::pipeline::{BuildState, StepRegistry};

use helpers::{Behavior, PATCH, RecordingStep, TestEnv, posted_statuses, registry, sha};

/// Serve the pull request diff and accept every status update.
async fn github(diff_status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/pull/1.diff"))
        .respond_with(ResponseTemplate::new(diff_status).set_body_string(PATCH))
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path_regex("^/statuses/[0-9a-zA-Z]{40}$"))
        .and(matchers::header("authorization", "Bearer status-token"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    server
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn steps_report_independently() {
    let env = TestEnv::new();
    let server = github(200).await;
    let orch = env.orchestrator(registry(vec![
        ("lint", "Lint", Behavior::Succeed("All good.")),
        ("test", "Tests", Behavior::Fail("2 tests failed.")),
    ]));

    let report = orch.trigger(env.options(&sha(1), &server)).await.unwrap();

    assert_eq!(report.state, BuildState::Completed);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].state, StatusState::Success);
    assert_eq!(report.steps[0].status, "All good.");
    assert_eq!(report.steps[1].state, StatusState::Failure);
    assert!(!orch.lock().is_locked());

    // The diff was applied on top of the base commit.
    assert_eq!(
        std::fs::read_to_string(env.checkout.join("added.txt")).unwrap(),
        "hello from the pull request\n"
    );

    let statuses = posted_statuses(&server).await;
    assert_eq!(statuses.len(), 4);
    let for_context = |context: &str| -> Vec<&str> {
        statuses
            .iter()
            .filter(|s| s["context"] == context)
            .map(|s| s["state"].as_str().unwrap())
            .collect()
    };
    assert_eq!(for_context("Lint"), vec!["pending", "success"]);
    assert_eq!(for_context("Tests"), vec!["pending", "failure"]);

    let final_lint = statuses
        .iter()
        .find(|s| s["context"] == "Lint" && s["state"] == "success")
        .unwrap();
    assert_eq!(final_lint["description"], "All good.");
    assert_eq!(
        final_lint["target_url"],
        format!("http://ci.test/build/{}/lint", sha(1))
    );

    let record = env.store.get_build(&sha(1)).await.unwrap();
    assert_eq!(record.author, "alice");
    assert_eq!(record.log, "Build started...");
    let update = record.slot("update").unwrap();
    assert!(update.starts_with("Update starting.\n"));
    assert!(update.contains("$ git apply --verbose -"));
    assert!(update.ends_with("Update completed.\n"));

    let lint = record.slot("lint").unwrap();
    assert!(lint.starts_with("Step starting.\nrunning lint\n"));
    assert!(lint.contains("success! All good."));
    assert!(record.slot("test").unwrap().contains("failure! 2 tests failed."));
}

#[tokio::test]
async fn failed_update_skips_steps_and_releases_lock() {
    let env = TestEnv::new();
    let server = github(404).await;
    let orch = env.orchestrator(registry(vec![(
        "lint",
        "Lint",
        Behavior::Succeed("All good."),
    )]));

    let report = orch.trigger(env.options(&sha(2), &server)).await.unwrap();

    assert_eq!(report.state, BuildState::Failed);
    assert!(report.steps.is_empty());
    assert!(!orch.lock().is_locked());

    let record = env.store.get_build(&sha(2)).await.unwrap();
    assert_eq!(record.slot_names().collect::<Vec<_>>(), vec!["update"]);
    let update = record.slot("update").unwrap();
    assert!(update.contains("Error: "));
    assert!(!update.contains("Update completed."));

    let statuses = posted_statuses(&server).await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["state"], "failure");
    assert_eq!(statuses[0]["context"], "Repository update");

    // A later build still gets the lock.
    let server = github(200).await;
    let report = orch.trigger(env.options(&sha(3), &server)).await.unwrap();
    assert_eq!(report.state, BuildState::Completed);
}

#[tokio::test]
async fn erroring_and_panicking_steps_report_error() {
    let env = TestEnv::new();
    let server = github(200).await;
    let orch = env.orchestrator(registry(vec![
        ("broken", "Broken", Behavior::Error("compiler missing")),
        ("explodes", "Explodes", Behavior::Panic),
        ("lint", "Lint", Behavior::Succeed("All good.")),
    ]));

    let report = orch.trigger(env.options(&sha(4), &server)).await.unwrap();

    assert_eq!(report.state, BuildState::Completed);
    let states: Vec<StatusState> = report.steps.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![StatusState::Error, StatusState::Error, StatusState::Success]
    );
    assert!(!orch.lock().is_locked());

    let statuses = posted_statuses(&server).await;
    assert_eq!(statuses.len(), 6);
    for status in statuses.iter().filter(|s| s["state"] == "error") {
        assert_eq!(status["description"], STEP_ERROR_MESSAGE);
    }
    assert_eq!(statuses.iter().filter(|s| s["state"] == "error").count(), 2);

    let record = env.store.get_build(&sha(4)).await.unwrap();
    let broken = record.slot("broken").unwrap();
    assert!(broken.contains("Error: compiler missing"));
    assert!(broken.contains(&format!("failure! {STEP_ERROR_MESSAGE}")));
    assert!(record.slot("explodes").unwrap().contains("step exploded"));
}

#[tokio::test]
async fn status_api_failures_do_not_abort_build() {
    let env = TestEnv::new();
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PATCH))
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let orch = env.orchestrator(registry(vec![(
        "lint",
        "Lint",
        Behavior::Succeed("All good."),
    )]));
    let report = orch.trigger(env.options(&sha(5), &server)).await.unwrap();

    assert_eq!(report.state, BuildState::Completed);
    assert_eq!(report.steps[0].state, StatusState::Success);
    assert_eq!(posted_statuses(&server).await.len(), 2);
}

#[tokio::test]
async fn concurrent_builds_are_serialized() {
    let env = TestEnv::new();
    let server = github(200).await;
    let events = Arc::new(Mutex::new(Vec::new()));

    let mut steps = StepRegistry::new();
    let recorded = Arc::clone(&events);
    steps.register(move || {
        Box::new(RecordingStep {
            events: Arc::clone(&recorded),
            delay: Duration::from_millis(200),
        })
    });
    let orch = Arc::new(env.orchestrator(steps));

    let first = {
        let orch = Arc::clone(&orch);
        let options = env.options(&sha(6), &server);
        tokio::spawn(async move { orch.trigger(options).await })
    };
    let second = {
        let orch = Arc::clone(&orch);
        let options = env.options(&sha(7), &server);
        tokio::spawn(async move { orch.trigger(options).await })
    };

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_eq!(first.unwrap().state, BuildState::Completed);
    assert_eq!(second.unwrap().state, BuildState::Completed);
    assert!(!orch.lock().is_locked());

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 4);
    let build_of = |event: &str| event.split_once(' ').unwrap().1.to_owned();
    assert!(events[0].starts_with("start"));
    assert!(events[1].starts_with("end"));
    assert_eq!(build_of(&events[0]), build_of(&events[1]));
    assert!(events[2].starts_with("start"));
    assert_eq!(build_of(&events[2]), build_of(&events[3]));
    assert_ne!(build_of(&events[0]), build_of(&events[2]));
}

#[tokio::test]
async fn builtin_json_validation_runs_against_checkout() {
    let env = TestEnv::new();
    let server = github(200).await;
    let vars = [("CI_STEPS", "validate-json")];
    let config = ci_server::config::Config::from_vars(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_owned())
    });
    let orch = env.orchestrator(StepRegistry::from_config(&config));

    let report = orch.trigger(env.options(&sha(8), &server)).await.unwrap();

    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].id, "validate-json");
    assert_eq!(report.steps[0].state, StatusState::Success);
    assert_eq!(report.steps[0].status, "Validated 1 JSON files.");

    let record = env.store.get_build(&sha(8)).await.unwrap();
    assert!(
        record
            .slot("validate-json")
            .unwrap()
            .contains("data/config.json contains valid JSON data.")
    );
}

// ---------------------------------------------------------------------------
// Webhook to finished build
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_drives_build_to_completion() {
    let env = TestEnv::new();
    let server = github(200).await;
    let state = env.state(registry(vec![
        ("lint", "Lint", Behavior::Succeed("All <good>.")),
        ("test", "Tests", Behavior::Fail("Nope.")),
    ]));
    let app = helpers::test_router(state);

    let body = helpers::pr_event("synchronize", &sha(9), &env.base, &server);
    let (status, text) = helpers::signed_push(&app, "pull_request", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Event handled.");

    let store = Arc::clone(&env.store);
    helpers::wait_for("both steps to finish", || {
        let store = Arc::clone(&store);
        async move {
            let Some(record) = store.get_build(&sha(9)).await else {
                return false;
            };
            ["lint", "test"].iter().all(|step| {
                record
                    .slot(step)
                    .is_some_and(|log| log.contains("Step finished"))
            })
        }
    })
    .await;

    let (status, text) = helpers::get_text(&app, "/build/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("<h1>Most recent builds</h1><ul>"));
    assert!(text.contains(&format!("(<a href=\"/build/{}/update\">log</a>)", sha(9))));
    assert!(text.contains("<b>alice</b>"));

    let (status, text) = helpers::get_text(&app, &format!("/build/{}", sha(9))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Build started...");

    let (status, text) = helpers::get_text(&app, &format!("/build/{}/lint", sha(9))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with("<style>error { color: red; font-weight: bold; }</style>"));
    assert!(text.contains(&format!("<a href=\"/build/{}/update\">update</a>", sha(9))));
    assert!(text.contains(" - "));
    assert!(text.contains("<hr><pre>Step starting."));
    assert!(text.contains("All &lt;good&gt;."));

    let (status, _) = helpers::get_text(&app, &format!("/build/{}/deploy", sha(9))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
