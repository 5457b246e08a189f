use std::sync::Arc;

use super::*;
use crate::store::memory::MemoryStore;
use crate::utils::test_utils::{create_test_conversation, FlakyStore};

fn contents(conversation: &Conversation) -> Vec<(TranscriptRole, String)> {
    conversation
        .transcript()
        .messages()
        .iter()
        .map(|message| (message.role, message.content.clone()))
        .collect()
}

fn turn(role: TranscriptRole, content: &str) -> (TranscriptRole, String) {
    (role, content.to_string())
}

async fn stored_contents(store: &dyn PersistenceGateway, id: ConversationId) -> Vec<String> {
    store
        .list_messages(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|message| message.content)
        .collect()
}

async fn complete(conversation: &mut Conversation, stream_id: u64, parts: &[&str]) -> StreamUpdate {
    for part in parts {
        let update = conversation
            .handle_stream_message(stream_id, StreamMessage::Chunk(part.to_string()))
            .await;
        assert_eq!(update, StreamUpdate::Delta(part.to_string()));
    }
    conversation
        .handle_stream_message(stream_id, StreamMessage::End)
        .await
}

#[tokio::test]
async fn new_conversation_starts_idle_and_opens_ready() {
    let store = Arc::new(MemoryStore::new());
    let mut conversation = Conversation::new(store.clone(), ConversationOptions::default());
    assert_eq!(conversation.state(), ConversationState::Idle);
    assert_eq!(conversation.conversation_id(), None);

    let id = conversation.open(None).await.unwrap();
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(conversation.conversation_id(), Some(id));
    assert_eq!(conversation.title(), "New Chat");

    let record = store.get_conversation(&id).await.unwrap();
    assert_eq!(record.owner, "local");
}

#[tokio::test]
async fn submit_before_open_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let mut conversation = Conversation::new(store, ConversationOptions::default());
    assert!(matches!(
        conversation.submit("hi").await,
        Err(ConversationError::NotReady(ConversationState::Idle))
    ));
}

#[tokio::test]
async fn deltas_coalesce_into_one_assistant_turn() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();

    let request = conversation.submit("  greet me  ").await.unwrap();
    assert_eq!(conversation.state(), ConversationState::Streaming);
    assert_eq!(request.conversation_id, id);
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, "user");
    assert_eq!(request.messages[0].content, "greet me");

    let update = complete(&mut conversation, request.stream_id, &["Hel", "lo", " world"]).await;
    assert_eq!(update, StreamUpdate::Completed { saved: true });
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(
        contents(&conversation),
        vec![
            turn(TranscriptRole::User, "greet me"),
            turn(TranscriptRole::Assistant, "Hello world"),
        ]
    );
    assert!(conversation.transcript().messages().iter().all(|m| m.id.is_some()));
    assert_eq!(
        stored_contents(store.as_ref(), id).await,
        vec!["greet me", "Hello world"]
    );
}

#[tokio::test]
async fn transcript_grows_while_streaming() {
    let (mut conversation, _store) = create_test_conversation().await;
    let request = conversation.submit("hi").await.unwrap();

    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("He".into()))
        .await;
    assert_eq!(conversation.transcript().last().unwrap().content, "He");
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("y".into()))
        .await;
    assert_eq!(conversation.transcript().len(), 2);
    assert_eq!(conversation.transcript().last().unwrap().content, "Hey");
}

#[tokio::test]
async fn blank_submissions_are_rejected() {
    let (mut conversation, _store) = create_test_conversation().await;
    assert!(matches!(
        conversation.submit(" \n\t").await,
        Err(ConversationError::EmptyMessage)
    ));
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert!(conversation.transcript().is_empty());
}

#[tokio::test]
async fn submit_while_streaming_is_busy() {
    let (mut conversation, _store) = create_test_conversation().await;
    let request = conversation.submit("first").await.unwrap();

    assert!(matches!(
        conversation.submit("second").await,
        Err(ConversationError::Busy)
    ));
    assert!(matches!(
        conversation.regenerate().await,
        Err(ConversationError::Busy)
    ));
    assert!(matches!(conversation.open(None).await, Err(ConversationError::Busy)));
    assert!(!request.cancel_token.is_cancelled());
    assert_eq!(conversation.transcript().len(), 1);
}

#[tokio::test]
async fn regenerate_replaces_the_trailing_reply() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    let request = conversation.submit("hi").await.unwrap();
    complete(&mut conversation, request.stream_id, &["hello"]).await;

    let request = conversation.regenerate().await.unwrap();
    assert_eq!(contents(&conversation), vec![turn(TranscriptRole::User, "hi")]);
    assert_eq!(request.messages.len(), 1);
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi"]);

    let update = complete(&mut conversation, request.stream_id, &["hey"]).await;
    assert_eq!(update, StreamUpdate::Completed { saved: true });
    assert_eq!(
        contents(&conversation),
        vec![
            turn(TranscriptRole::User, "hi"),
            turn(TranscriptRole::Assistant, "hey"),
        ]
    );
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi", "hey"]);
}

#[tokio::test]
async fn regenerate_deletes_by_identifier_not_recency() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    let request = conversation.submit("hi").await.unwrap();
    complete(&mut conversation, request.stream_id, &["hello"]).await;

    // Another writer appends after the reply; it must survive the regenerate.
    store
        .append_message(&id, TranscriptRole::User, "from elsewhere")
        .await
        .unwrap();

    conversation.regenerate().await.unwrap();
    assert_eq!(
        stored_contents(store.as_ref(), id).await,
        vec!["hi", "from elsewhere"]
    );
}

#[tokio::test]
async fn regenerate_needs_a_completed_exchange() {
    let (mut conversation, _store) = create_test_conversation().await;
    assert!(matches!(
        conversation.regenerate().await,
        Err(ConversationError::NothingToRegenerate)
    ));

    let request = conversation.submit("hi").await.unwrap();
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::End)
        .await;
    assert!(matches!(
        conversation.regenerate().await,
        Err(ConversationError::NothingToRegenerate)
    ));
}

#[tokio::test]
async fn empty_completion_adds_no_assistant_turn() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    let request = conversation.submit("hi").await.unwrap();

    let update = conversation
        .handle_stream_message(request.stream_id, StreamMessage::End)
        .await;
    assert_eq!(update, StreamUpdate::Completed { saved: false });
    assert_eq!(contents(&conversation), vec![turn(TranscriptRole::User, "hi")]);
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi"]);
}

#[tokio::test]
async fn stale_delta_after_reset_is_ignored() {
    let (mut conversation, _store) = create_test_conversation().await;
    let old_id = conversation.conversation_id().unwrap();
    let old = conversation.submit("before").await.unwrap();
    conversation
        .handle_stream_message(old.stream_id, StreamMessage::Chunk("par".into()))
        .await;

    let new_id = conversation.reset().await;
    assert_ne!(new_id, old_id);
    assert!(old.cancel_token.is_cancelled());
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert!(conversation.transcript().is_empty());

    let fresh = conversation.submit("after").await.unwrap();
    assert_ne!(fresh.stream_id, old.stream_id);

    for message in [
        StreamMessage::Chunk("tial".into()),
        StreamMessage::End,
        StreamMessage::Error(StreamError::Read("late".into())),
    ] {
        assert_eq!(
            conversation.handle_stream_message(old.stream_id, message).await,
            StreamUpdate::Ignored
        );
    }
    assert_eq!(contents(&conversation), vec![turn(TranscriptRole::User, "after")]);
    assert_eq!(conversation.state(), ConversationState::Streaming);
}

#[tokio::test]
async fn failure_returns_to_ready_and_keeps_partial_text_unsaved() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    let request = conversation.submit("hi").await.unwrap();
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("par".into()))
        .await;

    let error = StreamError::Read("connection reset".into());
    let update = conversation
        .handle_stream_message(request.stream_id, StreamMessage::Error(error.clone()))
        .await;
    assert_eq!(update, StreamUpdate::Failed { error, saved: false });
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(conversation.transcript().last().unwrap().content, "par");
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi"]);
}

#[tokio::test]
async fn partial_text_is_saved_when_configured() {
    let store = Arc::new(MemoryStore::new());
    let options = ConversationOptions {
        persist_partial_responses: true,
        ..Default::default()
    };
    let mut conversation = Conversation::new(store.clone(), options);
    let id = conversation.open(None).await.unwrap();

    let request = conversation.submit("hi").await.unwrap();
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("par".into()))
        .await;
    let update = conversation
        .handle_stream_message(
            request.stream_id,
            StreamMessage::Error(StreamError::Read("reset".into())),
        )
        .await;
    assert!(matches!(update, StreamUpdate::Failed { saved: true, .. }));
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi", "par"]);

    let request = conversation.submit("again").await.unwrap();
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("half".into()))
        .await;
    assert!(conversation.cancel().await);
    assert_eq!(
        stored_contents(store.as_ref(), id).await,
        vec!["hi", "par", "again", "half"]
    );
}

#[tokio::test]
async fn cancel_aborts_the_session() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    assert!(!conversation.cancel().await);

    let request = conversation.submit("hi").await.unwrap();
    conversation
        .handle_stream_message(request.stream_id, StreamMessage::Chunk("par".into()))
        .await;

    assert!(conversation.cancel().await);
    assert!(request.cancel_token.is_cancelled());
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(conversation.transcript().last().unwrap().content, "par");
    assert_eq!(stored_contents(store.as_ref(), id).await, vec!["hi"]);
    assert_eq!(
        conversation
            .handle_stream_message(request.stream_id, StreamMessage::End)
            .await,
        StreamUpdate::Ignored
    );
}

#[tokio::test]
async fn write_failures_are_reported_not_fatal() {
    let store = FlakyStore::new();
    let mut conversation = Conversation::new(store.clone(), ConversationOptions::default());
    conversation.open(None).await.unwrap();

    store.set_fail_writes(true);
    let request = conversation.submit("hi").await.unwrap();
    assert_eq!(conversation.transcript().last().unwrap().id, None);

    let update = complete(&mut conversation, request.stream_id, &["hello"]).await;
    assert_eq!(update, StreamUpdate::Completed { saved: false });
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(conversation.transcript().len(), 2);
}

#[tokio::test]
async fn read_failure_restores_prior_state() {
    let store = FlakyStore::new();
    let mut conversation = Conversation::new(store.clone(), ConversationOptions::default());
    let first = conversation.open(None).await.unwrap();
    let request = conversation.submit("hi").await.unwrap();
    complete(&mut conversation, request.stream_id, &["hello"]).await;

    let other = ConversationId::generate();
    assert!(matches!(
        conversation.open(Some(other)).await,
        Err(ConversationError::Store(StoreError::ConversationNotFound(_)))
    ));
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert_eq!(conversation.conversation_id(), Some(first));
    assert_eq!(conversation.transcript().len(), 2);

    store.set_fail_reads(true);
    let mut fresh = Conversation::new(store.clone(), ConversationOptions::default());
    assert!(matches!(
        fresh.open(Some(first)).await,
        Err(ConversationError::Store(StoreError::Unavailable(_)))
    ));
    assert_eq!(fresh.state(), ConversationState::Idle);
}

#[tokio::test]
async fn open_existing_loads_turns_in_order() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();
    let request = conversation.submit("hi").await.unwrap();
    complete(&mut conversation, request.stream_id, &["hello"]).await;
    conversation.rename("Greetings").await.unwrap();

    let mut reopened = Conversation::new(store.clone(), ConversationOptions::default());
    reopened.open(Some(id)).await.unwrap();
    assert_eq!(reopened.title(), "Greetings");
    assert_eq!(reopened.transcript(), conversation.transcript());
}

#[tokio::test]
async fn reset_survives_a_failed_create() {
    let store = FlakyStore::new();
    let mut conversation = Conversation::new(store.clone(), ConversationOptions::default());
    let first = conversation.open(None).await.unwrap();

    store.set_fail_writes(true);
    let second = conversation.reset().await;
    assert_ne!(first, second);
    assert_eq!(conversation.state(), ConversationState::Ready);
}

#[tokio::test]
async fn rename_trims_and_rejects_blank_titles() {
    let (mut conversation, store) = create_test_conversation().await;
    let id = conversation.conversation_id().unwrap();

    assert!(matches!(
        conversation.rename("   ").await,
        Err(ConversationError::Store(StoreError::InvalidTitle))
    ));
    conversation.rename("  Trip plans ").await.unwrap();
    assert_eq!(conversation.title(), "Trip plans");
    assert_eq!(store.get_conversation(&id).await.unwrap().title, "Trip plans");
}

#[tokio::test]
async fn deleting_the_open_conversation_resets() {
    let (mut conversation, store) = create_test_conversation().await;
    let current = conversation.conversation_id().unwrap();
    conversation.submit("hi").await.unwrap();

    conversation.delete(current).await.unwrap();
    assert_ne!(conversation.conversation_id(), Some(current));
    assert_eq!(conversation.state(), ConversationState::Ready);
    assert!(conversation.transcript().is_empty());
    assert!(matches!(
        store.get_conversation(&current).await,
        Err(StoreError::ConversationNotFound(_))
    ));
}

#[tokio::test]
async fn list_filters_by_title() {
    let (mut conversation, _store) = create_test_conversation().await;
    conversation.rename("Rust questions").await.unwrap();
    conversation.reset().await;
    conversation.rename("Dinner").await.unwrap();

    let all = conversation.list(None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].title, "Dinner");

    let rust = conversation.list(Some("rust")).await.unwrap();
    assert_eq!(rust.len(), 1);
    assert_eq!(rust[0].title, "Rust questions");
}
