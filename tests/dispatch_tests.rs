//! Dispatch Integration Tests
//!
//! These tests drive the dispatcher end to end with in-memory fakes for the
//! messenger, the attachment resolver and the commands.
//!
//! Run with: `cargo test --test dispatch_tests`

mod common;

use common::{harness, harness_with_resolver, FakeResolver, RecordingCommand, ADMIN, USER};
use pagebot::commands::{Command, CommandArgs};
use pagebot::dispatch::{DispatchOutcome, DropReason, MediaRequirement};
use pagebot::event::{InboundEvent, MediaRef};
use std::sync::Arc;

// ============================================================================
// Malformed Events
// ============================================================================

/// Test that events without a sender touch nothing
#[tokio::test]
async fn test_missing_sender_is_dropped_silently() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let event = InboundEvent {
        sender_id: None,
        ..InboundEvent::text(USER, "removebg").with_attachment("image", "https://cdn/a.jpg")
    };

    let outcome = h.dispatcher.dispatch(&event).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Dropped {
            reason: DropReason::MissingSender
        }
    );
    assert!(h.media.is_empty(), "No store mutation without a sender");
    assert!(h.messenger.sent().is_empty());
    assert!(removebg.calls().is_empty());
}

/// Test that a bare attachment is remembered for the next message
#[tokio::test]
async fn test_attachment_without_text_is_remembered() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let image_only = InboundEvent {
        text: None,
        ..InboundEvent::text(USER, "").with_attachment("image", "https://cdn/a.jpg")
    };
    let outcome = h.dispatcher.dispatch(&image_only).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Dropped {
            reason: DropReason::MissingText
        }
    );
    assert!(removebg.calls().is_empty());
    assert!(h.messenger.sent().is_empty());
    assert_eq!(
        h.media.peek(USER).image,
        Some(MediaRef::image("https://cdn/a.jpg"))
    );
}

/// Test that whitespace-only text counts as no text
#[tokio::test]
async fn test_blank_text_is_dropped() {
    let ai = RecordingCommand::new("ai");
    let h = harness(vec![ai.clone()]);

    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "   ")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Dropped {
            reason: DropReason::MissingText
        }
    );
    assert!(ai.calls().is_empty());
}

// ============================================================================
// Media Commands
// ============================================================================

/// Test image then command in a later message, consumed once
#[tokio::test]
async fn test_image_command_uses_stored_image_once() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let image_only = InboundEvent {
        text: None,
        ..InboundEvent::text(USER, "").with_attachment("image", "https://cdn/a.jpg")
    };
    h.dispatcher.dispatch(&image_only).await;

    let outcome = h
        .dispatcher
        .dispatch(&InboundEvent::text(USER, "removebg"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Invoked {
            command: "removebg".to_string(),
            args: CommandArgs::empty(),
            media: Some(MediaRef::image("https://cdn/a.jpg")),
        }
    );
    let calls = removebg.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].media, Some(MediaRef::image("https://cdn/a.jpg")));
    assert!(calls[0].args.is_empty());
    assert!(h.media.peek(USER).image.is_none(), "Image consumed");

    // Third attempt without a new image
    let outcome = h
        .dispatcher
        .dispatch(&InboundEvent::text(USER, "removebg"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::MediaMissing {
            command: "removebg".to_string(),
            requirement: MediaRequirement::Image,
        }
    );
    assert_eq!(removebg.calls().len(), 1);
}

/// Test the exact prompt when no image is available
#[tokio::test]
async fn test_image_command_without_image_prompts() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    h.dispatcher
        .dispatch(&InboundEvent::text(USER, "removebg"))
        .await;

    assert!(removebg.calls().is_empty());
    assert_eq!(
        h.messenger.sent(),
        vec![(
            USER.to_string(),
            "❌ Please send an image first, then type \"removebg\".".to_string()
        )]
    );
}

/// Test that an image in the same message is used directly
#[tokio::test]
async fn test_image_command_with_attachment_in_same_message() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let event = InboundEvent::text(USER, "RemoveBG").with_attachment("image", "https://cdn/b.jpg");
    h.dispatcher.dispatch(&event).await;

    assert_eq!(
        removebg.calls()[0].media,
        Some(MediaRef::image("https://cdn/b.jpg"))
    );
    assert!(h.media.is_empty());
}

/// Test that image-required commands ignore a stored video
#[tokio::test]
async fn test_image_command_ignores_video() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let event = InboundEvent::text(USER, "removebg").with_attachment("video", "https://cdn/v.mp4");
    let outcome = h.dispatcher.dispatch(&event).await;

    assert!(matches!(outcome, DispatchOutcome::MediaMissing { .. }));
    assert!(removebg.calls().is_empty());
    assert!(h.media.peek(USER).video.is_some(), "Video left untouched");
}

/// Test image priority over video for media commands, and both consumed
#[tokio::test]
async fn test_media_command_prefers_image_and_consumes_both() {
    let imgur = RecordingCommand::new("imgur");
    let h = harness(vec![imgur.clone()]);

    h.media.record_if_present(
        USER,
        &[pagebot::event::Attachment::new("video", Some("https://cdn/v.mp4"))],
    );
    let event = InboundEvent::text(USER, "imgur").with_attachment("image", "https://cdn/a.jpg");
    h.dispatcher.dispatch(&event).await;

    assert_eq!(
        imgur.calls()[0].media,
        Some(MediaRef::image("https://cdn/a.jpg"))
    );
    assert!(h.media.is_empty(), "Both image and video consumed");
}

/// Test that image-or-video commands fall back to video
#[tokio::test]
async fn test_media_command_uses_video_when_no_image() {
    let imgbb = RecordingCommand::new("imgbb");
    let h = harness(vec![imgbb.clone()]);

    let video_only = InboundEvent {
        text: None,
        ..InboundEvent::text(USER, "").with_attachment("video", "https://cdn/v.mp4")
    };
    h.dispatcher.dispatch(&video_only).await;
    h.dispatcher.dispatch(&InboundEvent::text(USER, "imgbb")).await;

    assert_eq!(
        imgbb.calls()[0].media,
        Some(MediaRef::video("https://cdn/v.mp4"))
    );
}

/// Test the prompts of both image-or-video variants
#[tokio::test]
async fn test_media_command_prompts() {
    let imgur = RecordingCommand::new("imgur");
    let ocr = RecordingCommand::new("ocr");
    let h = harness(vec![imgur.clone(), ocr.clone()]);

    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "imgur")).await;
    assert_eq!(
        outcome,
        DispatchOutcome::MediaMissing {
            command: "imgur".to_string(),
            requirement: MediaRequirement::ImageOrVideo,
        }
    );
    h.dispatcher.dispatch(&InboundEvent::text(USER, "ocr")).await;

    assert_eq!(
        h.messenger.texts(),
        vec![
            "❌ Please send an image or video first, then type \"imgur\".".to_string(),
            "❌ Please send an image first, then type \"ocr\".".to_string(),
        ]
    );
}

/// Test that typed arguments are not passed to media commands
#[tokio::test]
async fn test_media_command_drops_typed_arguments() {
    let blur = RecordingCommand::new("blur");
    let h = harness(vec![blur.clone()]);

    let event = InboundEvent::text(USER, "blur heavy please").with_attachment("image", "https://cdn/a.jpg");
    let outcome = h.dispatcher.dispatch(&event).await;

    match outcome {
        DispatchOutcome::Invoked { args, .. } => assert!(args.is_empty()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!blur.calls()[0].had_event);
}

/// Test the vision command gets arguments and the event, and always clears the image
#[tokio::test]
async fn test_vision_command() {
    let gemini = RecordingCommand::new("gemini");
    let h = harness(vec![gemini.clone()]);

    // Without media it still runs
    h.dispatcher
        .dispatch(&InboundEvent::text(USER, "gemini describe this"))
        .await;
    let calls = gemini.calls();
    assert_eq!(calls[0].args.tokens, vec!["describe", "this"]);
    assert!(calls[0].had_event);
    assert!(calls[0].media.is_none());

    // With media the image is passed and then consumed
    let event = InboundEvent::text(USER, "gemini what is it").with_attachment("image", "https://cdn/a.jpg");
    h.dispatcher.dispatch(&event).await;
    assert_eq!(
        gemini.calls()[1].media,
        Some(MediaRef::image("https://cdn/a.jpg"))
    );
    assert!(h.media.peek(USER).image.is_none());
}

/// Test that a failed media command keeps the context for a retry
#[tokio::test]
async fn test_failed_media_command_keeps_context() {
    let restore = RecordingCommand::failing("restore", "upstream busy");
    let h = harness(vec![restore.clone()]);

    let event = InboundEvent::text(USER, "restore").with_attachment("image", "https://cdn/a.jpg");
    let outcome = h.dispatcher.dispatch(&event).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Failed {
            command: "restore".to_string(),
            message: "upstream busy".to_string(),
        }
    );
    assert!(h.media.peek(USER).image.is_some());
}

/// Test that a media-table name without a registered command goes to the fallback
#[tokio::test]
async fn test_unregistered_media_command_falls_back() {
    let ai = RecordingCommand::new("ai");
    let h = harness(vec![ai.clone()]);

    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "removebg")).await;

    assert!(matches!(outcome, DispatchOutcome::Fallback { .. }));
    assert_eq!(ai.calls().len(), 1);
}

// ============================================================================
// Generic Commands
// ============================================================================

/// Test argument tokenization and stored media for generic commands
#[tokio::test]
async fn test_generic_command_gets_args_and_stored_media() {
    let translate = RecordingCommand::new("translate");
    let h = harness(vec![translate.clone()]);

    h.media.record_if_present(
        USER,
        &[pagebot::event::Attachment::new("video", Some("https://cdn/v.mp4"))],
    );
    let outcome = h
        .dispatcher
        .dispatch(&InboundEvent::text(USER, "TRANSLATE en  bonjour  le monde"))
        .await;

    let expected_args = CommandArgs {
        raw: "en  bonjour  le monde".to_string(),
        tokens: vec!["en", "bonjour", "le", "monde"]
            .into_iter()
            .map(String::from)
            .collect(),
    };
    assert_eq!(
        outcome,
        DispatchOutcome::Invoked {
            command: "translate".to_string(),
            args: expected_args.clone(),
            media: Some(MediaRef::video("https://cdn/v.mp4")),
        }
    );
    let call = &translate.calls()[0];
    assert_eq!(call.sender_id, USER);
    assert_eq!(call.args, expected_args);
    assert!(call.had_event);
    // Generic commands do not consume media
    assert!(h.media.peek(USER).video.is_some());
}

/// Test reply attachment wins over stored image
#[tokio::test]
async fn test_reply_attachment_has_priority() {
    let describe = RecordingCommand::new("describe");
    let h = harness_with_resolver(
        vec![describe.clone()],
        FakeResolver::with("m_prev", "https://cdn/replied.jpg"),
    );

    h.media.record_if_present(
        USER,
        &[pagebot::event::Attachment::new("image", Some("https://cdn/stored.jpg"))],
    );
    let event = InboundEvent::text(USER, "describe").with_reply_to("m_prev");
    h.dispatcher.dispatch(&event).await;

    assert_eq!(
        describe.calls()[0].media,
        Some(MediaRef::image("https://cdn/replied.jpg"))
    );
}

/// Test that a failing reply lookup does not abort dispatch
#[tokio::test]
async fn test_reply_lookup_failure_is_ignored() {
    let describe = RecordingCommand::new("describe");
    let h = harness(vec![describe.clone()]);

    h.media.record_if_present(
        USER,
        &[pagebot::event::Attachment::new("image", Some("https://cdn/stored.jpg"))],
    );
    let event = InboundEvent::text(USER, "describe").with_reply_to("m_unknown");
    let outcome = h.dispatcher.dispatch(&event).await;

    assert!(matches!(outcome, DispatchOutcome::Invoked { .. }));
    assert_eq!(
        describe.calls()[0].media,
        Some(MediaRef::image("https://cdn/stored.jpg"))
    );
    assert!(h.messenger.sent().is_empty(), "No user-visible error");
}

/// Test the configured prefix is stripped
#[tokio::test]
async fn test_prefix_is_stripped() {
    let ping = RecordingCommand::new("ping");
    let mut settings = pagebot::dispatch::DispatchSettings::default();
    settings.prefix = "/".to_string();
    let dispatcher = pagebot::dispatch::Dispatcher::new(
        Arc::new(
            pagebot::commands::CommandRegistry::builder()
                .register(ping.clone())
                .unwrap()
                .build(),
        ),
        pagebot::media_context::MediaContextStore::default(),
        Arc::new(FakeResolver::default()),
        Arc::new(common::RecordingMessenger::default()),
        settings,
    );

    let outcome = dispatcher.dispatch(&InboundEvent::text(USER, "/ping")).await;
    assert!(matches!(outcome, DispatchOutcome::Invoked { ref command, .. } if command == "ping"));
    assert_eq!(ping.calls().len(), 1);
}

// ============================================================================
// Authorization
// ============================================================================

/// Test that restricted commands never run for non-admins
#[tokio::test]
async fn test_restricted_command_denied_for_non_admin() {
    let broadcast = RecordingCommand::restricted("broadcast");
    let h = harness(vec![broadcast.clone()]);

    for text in ["broadcast", "broadcast hello everyone", "BROADCAST --force"] {
        let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, text)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::AuthorizationDenied {
                command: "broadcast".to_string()
            }
        );
    }

    assert!(broadcast.calls().is_empty());
    assert_eq!(
        h.messenger.texts(),
        vec!["🚫 You are not authorized to use this command."; 3]
    );
}

/// Test that admins can run restricted commands
#[tokio::test]
async fn test_restricted_command_allowed_for_admin() {
    let broadcast = RecordingCommand::restricted("broadcast");
    let h = harness(vec![broadcast.clone()]);

    let outcome = h
        .dispatcher
        .dispatch(&InboundEvent::text(ADMIN, "broadcast hi"))
        .await;

    assert!(matches!(outcome, DispatchOutcome::Invoked { .. }));
    assert_eq!(broadcast.calls()[0].sender_id, ADMIN);
}

/// Test that authorization also covers media commands, before the media check
#[tokio::test]
async fn test_restricted_media_command_denied() {
    let zombie = RecordingCommand::restricted("zombie");
    let h = harness(vec![zombie.clone()]);

    let event = InboundEvent::text(USER, "zombie").with_attachment("image", "https://cdn/a.jpg");
    let outcome = h.dispatcher.dispatch(&event).await;

    assert!(matches!(outcome, DispatchOutcome::AuthorizationDenied { .. }));
    assert!(zombie.calls().is_empty());
    assert!(h.media.peek(USER).image.is_some(), "Nothing consumed");
}

// ============================================================================
// Fallback
// ============================================================================

/// Test unknown commands go to the fallback with the whole text
#[tokio::test]
async fn test_unknown_command_uses_fallback_with_full_text() {
    let ai = RecordingCommand::new("ai");
    let h = harness(vec![ai.clone()]);

    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "foo bar")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Fallback {
            command: "ai".to_string(),
            text: "foo bar".to_string(),
        }
    );
    let calls = ai.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args.tokens, vec!["foo bar"]);
    assert_eq!(calls[0].args.raw, "foo bar");
    assert!(calls[0].had_event);
    assert!(calls[0].media.is_none());
}

/// Test unknown commands without a fallback get exactly one reply
#[tokio::test]
async fn test_unknown_command_without_fallback() {
    let ping = RecordingCommand::new("ping");
    let h = harness(vec![ping.clone()]);

    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "foo bar")).await;

    assert_eq!(
        outcome,
        DispatchOutcome::UnknownCommand {
            command: "foo".to_string()
        }
    );
    assert!(ping.calls().is_empty());
    assert_eq!(
        h.messenger.sent(),
        vec![(
            USER.to_string(),
            "❓ Unknown command and AI fallback unavailable.".to_string()
        )]
    );
}

// ============================================================================
// Failures
// ============================================================================

/// Test command errors are reported with their own message
#[tokio::test]
async fn test_command_error_message_is_sent() {
    let search = RecordingCommand::failing("search", "⚠️ Search service is down.");
    let h = harness(vec![search.clone()]);

    let outcome = h
        .dispatcher
        .dispatch(&InboundEvent::text(USER, "search rust"))
        .await;

    assert_eq!(
        outcome,
        DispatchOutcome::Failed {
            command: "search".to_string(),
            message: "⚠️ Search service is down.".to_string(),
        }
    );
    assert_eq!(h.messenger.texts(), vec!["⚠️ Search service is down."]);
}

/// Test a blank error message falls back to the generic text
#[tokio::test]
async fn test_blank_command_error_uses_generic_message() {
    let search = RecordingCommand::failing("search", "  ");
    let h = harness(vec![search.clone()]);

    h.dispatcher
        .dispatch(&InboundEvent::text(USER, "search rust"))
        .await;

    assert_eq!(h.messenger.texts(), vec!["❌ Error executing \"search\"."]);
}

/// Test that a failing event does not affect the next one
#[tokio::test]
async fn test_failure_does_not_block_subsequent_events() {
    let search = RecordingCommand::failing("search", "boom");
    let ping = RecordingCommand::new("ping");
    let commands: Vec<Arc<dyn Command>> = vec![search.clone(), ping.clone()];
    let h = harness(commands);

    h.dispatcher.dispatch(&InboundEvent::text(USER, "search")).await;
    let outcome = h.dispatcher.dispatch(&InboundEvent::text(USER, "ping")).await;

    assert!(matches!(outcome, DispatchOutcome::Invoked { .. }));
    assert_eq!(ping.calls().len(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Test that concurrent users keep independent media context
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_users_are_isolated() {
    let removebg = RecordingCommand::new("removebg");
    let h = harness(vec![removebg.clone()]);

    let tasks = (0..20).map(|i| {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            let user = format!("user-{i}");
            let url = format!("https://cdn/{i}.jpg");
            let event = InboundEvent::text(&user, "removebg").with_attachment("image", &url);
            (url, dispatcher.dispatch(&event).await)
        })
    });

    for result in futures::future::join_all(tasks).await {
        let (url, outcome) = result.unwrap();
        match outcome {
            DispatchOutcome::Invoked { media, .. } => assert_eq!(media, Some(MediaRef::image(url))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(removebg.calls().len(), 20);
    assert!(h.media.is_empty());
}
