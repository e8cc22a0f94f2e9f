//! Team fabric scenarios: escalation after repeated failure, and query
//! routing with forwarding and enrichment.

use std::sync::Arc;
use std::time::Duration;

use weft::event::{topic, Event};
use weft::llm::MockLlm;
use weft::route::AskOptions;
use weft::runtime::Runtime;
use weft::store::tasks::NewTask;
use weft::tools::{PeerAnswerQuestionTool, PeerForwardQuestionTool, Tool, ToolContext};

fn test_config() -> project_config::ProjectConfig {
    let mut config = project_config::ProjectConfig::default();
    config.model.escalation.chain = vec![
        "zai:glm-5".to_string(),
        "anthropic:claude-sonnet-4-6".to_string(),
        "anthropic:claude-opus-4-6".to_string(),
    ];
    config.team.templates.insert(
        "feature".to_string(),
        project_config::TeamTemplate {
            agents: vec![
                project_config::TemplateAgent {
                    name: "lead".to_string(),
                    role: "lead".to_string(),
                },
                project_config::TemplateAgent {
                    name: "coder".to_string(),
                    role: "coder".to_string(),
                },
                project_config::TemplateAgent {
                    name: "reviewer".to_string(),
                    role: "reviewer".to_string(),
                },
            ],
        },
    );
    config
}

async fn runtime() -> (tempfile::TempDir, Runtime, Arc<MockLlm>) {
    let dir = tempfile::tempdir().unwrap();
    let store = weft::Store::open(dir.path().join("weft.db")).unwrap();
    let llm = Arc::new(MockLlm::new());
    let rt = Runtime::with_store(dir.path(), test_config(), llm.clone(), store).unwrap();
    (dir, rt, llm)
}

/// S5: two recorded failures on the task, then a failing LLM call. The agent
/// escalates once up the chain, the retry succeeds, and exactly one
/// escalation event lands in the cost tracker.
#[tokio::test]
async fn escalation_after_repeated_failure() {
    let (_dir, rt, llm) = runtime().await;
    let team_id = rt.manager.create_team("auth-team").await.unwrap();
    let agent = rt
        .manager
        .spawn_agent(&team_id, "alice", "coder", None)
        .await
        .unwrap();

    let mut task = NewTask::new("wire auth", "connect the jwt middleware");
    task.model_hint = Some("zai:glm-5".to_string());
    let task = rt.tasks.create_task(&team_id, task).await.unwrap();
    rt.tasks.assign_task(&task.id, "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Prior failures on the same (team, agent, task).
    rt.router.record_failure(&team_id, "alice", &task.id);
    rt.router.record_failure(&team_id, "alice", &task.id);

    llm.push_error("upstream 500");
    llm.push_text("auth wired");

    let answer = agent.send_message("please do the task").await.unwrap();
    assert_eq!(answer, "auth wired");

    let models = llm.models_called();
    assert_eq!(
        models,
        vec!["zai:glm-5".to_string(), "anthropic:claude-sonnet-4-6".to_string()],
        "task hint model first, then the next chain entry"
    );

    let escalations = rt.cost.team_escalations(&team_id);
    assert_eq!(escalations.len(), 1);
    assert_eq!(escalations[0].agent, "alice");
    assert_eq!(escalations[0].from_model, "zai:glm-5");
    assert_eq!(escalations[0].to_model, "anthropic:claude-sonnet-4-6");

    // Success cleared the failure counter.
    assert_eq!(rt.router.failure_count(&team_id, "alice", &task.id), 0);
}

/// S6: alice asks bob; bob forwards to carol with an enrichment; carol
/// answers. Alice receives the answer with the enrichment attached and the
/// query entry is gone.
#[tokio::test]
async fn query_routing_with_forwarding_and_enrichment() {
    let (_dir, rt, _llm) = runtime().await;
    let team_id = rt.manager.create_team("auth-team").await.unwrap();
    let alice = rt
        .manager
        .spawn_agent(&team_id, "alice", "researcher", None)
        .await
        .unwrap();
    let mut observer = rt.bus.subscribe(&topic::agent(&team_id, "alice"));

    let before = alice.snapshot().await.unwrap().message_count;
    let query_id = rt.queries.ask(
        &team_id,
        "alice",
        "How is auth wired?",
        AskOptions {
            target: Some("bob".to_string()),
            ..Default::default()
        },
    );

    let bob_ctx = ToolContext {
        team_id: Some(team_id.clone()),
        agent_name: Some("bob".to_string()),
        ..Default::default()
    };
    PeerForwardQuestionTool::new(rt.queries.clone())
        .execute(
            serde_json::json!({
                "query_id": query_id,
                "target": "carol",
                "enrichment": "see lib/auth",
            }),
            &bob_ctx,
        )
        .await
        .unwrap();

    let carol_ctx = ToolContext {
        agent_name: Some("carol".to_string()),
        ..bob_ctx
    };
    PeerAnswerQuestionTool::new(rt.queries.clone())
        .execute(
            serde_json::json!({"query_id": query_id, "answer": "JWT"}),
            &carol_ctx,
        )
        .await
        .unwrap();

    // The observer on alice's direct topic sees the enriched answer.
    let mut saw_answer = false;
    while let Some(event) = observer.try_recv() {
        if let Event::QueryAnswer {
            query_id: id,
            from,
            answer,
            enrichments,
        } = event
        {
            assert_eq!(id, query_id);
            assert_eq!(from, "carol");
            assert_eq!(answer, "JWT");
            assert_eq!(enrichments, vec!["see lib/auth".to_string()]);
            saw_answer = true;
        }
    }
    assert!(saw_answer);

    // The in-flight entry is deleted once answered.
    assert!(rt.queries.get(&query_id).is_none());

    // Alice's conversation absorbed the answer event.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = alice.snapshot().await.unwrap().message_count;
    assert!(after > before, "alice should have appended the answer");
}

/// Unknown roles fail the spawn; duplicate names on one team fail too.
#[tokio::test]
async fn spawn_rejects_unknown_role_and_duplicates() {
    let (_dir, rt, _llm) = runtime().await;
    let team_id = rt.manager.create_team("t").await.unwrap();

    let err = rt
        .manager
        .spawn_agent(&team_id, "zed", "poet", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown role"));

    rt.manager
        .spawn_agent(&team_id, "alice", "coder", None)
        .await
        .unwrap();
    let err = rt
        .manager
        .spawn_agent(&team_id, "alice", "coder", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

/// Template expansion spawns the configured agent list and registers each.
#[tokio::test]
async fn template_spawns_configured_agents() {
    let (_dir, rt, _llm) = runtime().await;
    let team_id = rt.manager.create_team("feature-work").await.unwrap();
    let names = rt
        .manager
        .spawn_from_template(&team_id, "feature")
        .await
        .unwrap();
    assert_eq!(names, vec!["lead", "coder", "reviewer"]);
    assert_eq!(rt.registry.names_for_team(&team_id).len(), 3);

    let err = rt
        .manager
        .spawn_from_template(&team_id, "nonexistent")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown team template"));
}

/// Dissolving a sub-team announces completion on the parent's topic.
#[tokio::test]
async fn sub_team_dissolve_announces_on_parent_topic() {
    let (_dir, rt, _llm) = runtime().await;
    let parent = rt.manager.create_team("parent").await.unwrap();
    let sub = rt.manager.create_sub_team(&parent, "spike").await.unwrap();
    rt.manager
        .spawn_agent(&sub, "scout", "researcher", None)
        .await
        .unwrap();

    let mut parent_sub = rt.bus.subscribe(&topic::team(&parent));
    rt.manager.dissolve_sub_team(&sub).await.unwrap();

    let mut saw_completion = false;
    while let Some(event) = parent_sub.try_recv() {
        if let Event::SubTeamCompleted { team_id } = event {
            assert_eq!(team_id, sub);
            saw_completion = true;
        }
    }
    assert!(saw_completion);

    // The worker is gone (registry entry released once the task exits).
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rt.manager.agent(&sub, "scout").is_none());
}
