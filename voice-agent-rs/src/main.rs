// voice-agent-rs/src/main.rs
// Console voice agent: loads settings, starts silence modeling on a session
// and routes speech through the failure-tolerant handlers

mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use failure_tolerance_rs::types::service_names::AGENT_SESSION;
use failure_tolerance_rs::{init_logging, EscalationManager, LoggingConfig, SessionHandler};
use shared_types_rs::{AgentSettings, AgentState, Language, ReplyOptions, SessionEvent, UserState};
use silence_modeling_rs::{ConversationalConfig, CulturalTimingRules, SilenceModelingEngine};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::console::ConsoleSession;

fn greeting(language: Language) -> &'static str {
    match language {
        Language::Japanese => "こんにちは。本日はどのようなご用件でしょうか？",
        Language::English => "Hello! How can I help you today?",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = AgentSettings::load().context("Failed to load agent settings")?;
    init_logging(Some(LoggingConfig::for_agent(&settings))).context("Failed to initialize logging")?;

    info!(
        language = %settings.language,
        language_tag = %settings.language_tag,
        preemptive_generation = settings.preemptive_generation,
        "Starting voice agent"
    );

    let rules = CulturalTimingRules::for_tag(&settings.language_tag);
    let conversation = ConversationalConfig::from_settings(&settings);
    info!(
        min_endpointing_delay_secs = conversation.min_endpointing_delay.as_secs_f64(),
        max_endpointing_delay_secs = conversation.max_endpointing_delay.as_secs_f64(),
        tts_speed = settings.tts.speed,
        tts_emotion = %settings.tts.emotion,
        "Conversation timing configured"
    );

    let session = Arc::new(ConsoleSession::new());
    let mut engine = SilenceModelingEngine::from_config(session.clone(), rules, &conversation);
    engine.start();

    let handler = SessionHandler::new(session.clone());
    let mut escalation = EscalationManager::new(session.clone(), None);

    let result = handler.say(greeting(settings.language), false).await;
    if let Some(context) = result.context.as_ref() {
        error!(error = %context.error, "Greeting failed");
        escalation.handle_escalation(&result, AGENT_SESSION, context).await;
    }

    tokio::select! {
        _ = run_conversation(&session, &handler, &mut escalation) => {
            info!("Scripted conversation finished");
        }
        _ = shutdown_signal() => {}
    }

    engine.stop().await;
    session.close();

    let stats = engine.get_stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        mode = %escalation.current_mode(),
        failures = escalation.failure_count(),
        "Voice agent stopped"
    );
    Ok(())
}

/// Replays one exchange: the user talks, pauses, interrupts the agent
/// with real speech and then with a cough.
async fn run_conversation(session: &ConsoleSession, handler: &SessionHandler, escalation: &mut EscalationManager) {
    session.emit(SessionEvent::UserStateChanged {
        new_state: UserState::Speaking,
    });
    sleep(Duration::from_millis(800)).await;
    session.emit(SessionEvent::UserInputTranscribed {
        transcript: "I'd like to check my order".to_string(),
    });
    session.emit(SessionEvent::UserStateChanged {
        new_state: UserState::Listening,
    });
    // Long enough for a thinking pause and an end of turn
    sleep(Duration::from_millis(1500)).await;

    let result = handler
        .generate_reply("Ask the user for their order number", ReplyOptions::default())
        .await;
    match result.context.as_ref() {
        Some(context) => {
            if !escalation.handle_escalation(&result, AGENT_SESSION, context).await {
                warn!(category = %context.category, "Reply failed without escalation");
            }
        }
        None => info!(attempts = result.attempts, "Reply generated"),
    }

    session.emit(SessionEvent::AgentStateChanged {
        old_state: AgentState::Listening,
        new_state: AgentState::Speaking,
    });
    sleep(Duration::from_millis(500)).await;
    session.emit(SessionEvent::AgentStateChanged {
        old_state: AgentState::Speaking,
        new_state: AgentState::Listening,
    });
    session.emit(SessionEvent::UserInputTranscribed {
        transcript: "Sorry, it's 4 2 1 9".to_string(),
    });
    sleep(Duration::from_millis(300)).await;
    session.emit(SessionEvent::AgentStateChanged {
        old_state: AgentState::Listening,
        new_state: AgentState::Speaking,
    });

    sleep(Duration::from_millis(500)).await;
    session.emit(SessionEvent::AgentStateChanged {
        old_state: AgentState::Speaking,
        new_state: AgentState::Listening,
    });
    // No transcript follows, so the timeout settles it as false
    sleep(Duration::from_secs(3)).await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
