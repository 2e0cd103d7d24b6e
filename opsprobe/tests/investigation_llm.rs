//! Investigation tests against a real OpenAI-compatible endpoint.
//!
//! These tests are excluded from regular CI runs because they need network
//! access and API credentials.
//!
//! # Prerequisites
//!
//! - `OPSPROBE_AGENT_TOKEN`: API token.
//! - `OPSPROBE_BASE_URL` (optional): defaults to `https://api.openai.com/v1`.
//! - `OPSPROBE_MODEL` (optional): defaults to `gpt-4o-mini`.
//!
//! Run with: `cargo test -p opsprobe --test investigation_llm -- --ignored`

use std::time::{Duration, Instant};

use opsprobe::core::policy::Policy;
use opsprobe::core::types::{AgentKind, AgentResponse};
use opsprobe::guided::guided_ask;
use opsprobe::io::approval::AutoApprover;
use opsprobe::io::config::ModelConfig;
use opsprobe::io::executer::{CachingExecuter, SystemShell};
use opsprobe::io::llm::HttpChatModel;
use opsprobe::io::prompt::PromptEngine;
use opsprobe::session::{Session, SessionConfig};

fn live_model(system_prompt: &str) -> HttpChatModel {
    let defaults = ModelConfig::default();
    let config = ModelConfig {
        name: std::env::var("OPSPROBE_MODEL").unwrap_or(defaults.name.clone()),
        base_url: std::env::var("OPSPROBE_BASE_URL").unwrap_or(defaults.base_url.clone()),
        auth_token: std::env::var("OPSPROBE_AGENT_TOKEN").expect("OPSPROBE_AGENT_TOKEN not set"),
        ..defaults
    };
    HttpChatModel::new(&config, system_prompt, Duration::from_secs(45)).expect("model")
}

/// The agent prompt alone is enough to get a schema-conforming reply.
#[test]
#[ignore]
fn agent_reply_matches_schema() {
    let policy = Policy::linux();
    let prompt = PromptEngine::new()
        .expect("prompts")
        .agent_system_prompt(AgentKind::Linux, &policy)
        .expect("render");
    let mut model = live_model(&prompt);

    let deadline = Instant::now() + Duration::from_secs(60);
    let response: AgentResponse =
        guided_ask(&mut model, deadline, "How much free disk space is there?", 3).expect("reply");
    println!("{response:?}");
    println!("{}", model.log_usage());
}

/// A short Linux session ends with an answer or the iteration notice, never an error.
#[test]
#[ignore]
fn linux_session_finishes() {
    let policy = Policy::linux();
    let prompt = PromptEngine::new()
        .expect("prompts")
        .agent_system_prompt(AgentKind::Linux, &policy)
        .expect("render");
    let mut session = Session::new(
        live_model(&prompt),
        CachingExecuter::new(SystemShell, Duration::from_secs(10), 20_000),
        policy,
        SessionConfig::default(),
    );

    let deadline = Instant::now() + Duration::from_secs(120);
    let outcome = session
        .run(deadline, &mut AutoApprover, "What kernel version is this host running?", |event| {
            println!("{event:?}");
        })
        .expect("session");
    println!("{}", outcome.message());
    println!("{}", session.model().log_usage());
}
