//! End-to-end turn behavior against a scripted backend and a real database

mod common;

use common::{scripted_engine, ReadOnlyCheckpoints, ScriptedGateway, Step};
use futures::StreamExt;
use parley::engine::{ConversationEngine, InvocationConfig, ResponseMode, TurnRequest, TurnResponse};
use parley::error::{kind, ParleyError};
use parley::providers::{Message, Role};
use parley::storage::{CheckpointStore, SessionStore, DEFAULT_TITLE};
use std::sync::Arc;

fn google(api_key: &str) -> InvocationConfig {
    InvocationConfig::new("Google", "gemini-2.5-flash", api_key, "You are a helpful assistant.")
}

fn reply(text: &str) -> Step {
    Step::Reply(text.to_string())
}

#[tokio::test]
async fn test_turns_alternate_user_and_assistant() {
    let (engine, gateway, storage, _tmp) = scripted_engine([
        reply("first answer"),
        reply("Greeting"),
        reply("second answer"),
        reply("third answer"),
    ]);

    let first = engine
        .send_turn(TurnRequest::new(None, google("key"), "one"))
        .await
        .unwrap();
    let thread = first.thread_id.clone();
    for utterance in ["two", "three"] {
        engine
            .send_turn(TurnRequest::new(Some(thread.clone()), google("key"), utterance))
            .await
            .unwrap();
    }

    let messages = storage.load_thread(&thread).unwrap();
    assert_eq!(messages.len(), 6);
    for (i, message) in messages.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(message.role, expected, "message {} has the wrong role", i);
    }
    assert_eq!(messages[4], Message::user("three"));
    assert_eq!(messages[5], Message::assistant("third answer"));

    // The last generation saw the two earlier turns replayed in order
    let calls = gateway.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.history, messages[..4].to_vec());
    assert_eq!(last.new_message, Message::user("three"));
    assert_eq!(last.system_prompt, "You are a helpful assistant.");
}

#[tokio::test]
async fn test_first_turn_reply_and_title() {
    let (engine, gateway, storage, _tmp) =
        scripted_engine([reply("4"), reply("\"Simple Arithmetic Question.\"")]);

    let turn = engine
        .send_turn(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap();

    assert_eq!(turn.message, Message::assistant("4"));
    assert_eq!(turn.title.as_deref(), Some("Simple Arithmetic Question"));
    assert_eq!(
        storage.load_thread(&turn.thread_id).unwrap(),
        vec![Message::user("What is 2+2?"), Message::assistant("4")]
    );

    let session = engine.get_session(&turn.thread_id).unwrap();
    assert_eq!(session.title, "Simple Arithmetic Question");
    assert!(session.title.chars().count() <= 50);
    assert_eq!(session.message_count, 2);

    // The title request stands alone, without the thread's history
    let calls = gateway.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].history.is_empty());
    assert_eq!(calls[1].new_message, Message::user("What is 2+2?"));
}

#[tokio::test]
async fn test_title_failure_falls_back_to_first_message() {
    let long = "Explain how the borrow checker decides when a reference outlives its owner";
    let (engine, _gateway, _storage, _tmp) =
        scripted_engine([reply("answer"), Step::Fail("quota exceeded".to_string())]);

    let turn = engine
        .send_turn(TurnRequest::new(None, google("key"), long))
        .await
        .unwrap();

    let expected = format!("{}...", long.chars().take(40).collect::<String>());
    assert_eq!(turn.title.as_deref(), Some(expected.as_str()));
    assert_eq!(engine.get_session(&turn.thread_id).unwrap().title, expected);
}

#[tokio::test]
async fn test_title_is_set_only_once() {
    let (engine, gateway, _storage, _tmp) =
        scripted_engine([reply("hi"), reply("Greetings"), reply("still here")]);

    let first = engine
        .send_turn(TurnRequest::new(None, google("key"), "hello"))
        .await
        .unwrap();
    let second = engine
        .send_turn(TurnRequest::new(
            Some(first.thread_id.clone()),
            google("key"),
            "are you there?",
        ))
        .await
        .unwrap();

    assert_eq!(second.title, None);
    assert_eq!(engine.get_session(&first.thread_id).unwrap().title, "Greetings");
    assert_eq!(gateway.calls().len(), 3);
}

#[tokio::test]
async fn test_failed_generation_leaves_thread_unchanged() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([
        reply("fine"),
        reply("Title"),
        Step::Fail("HTTP 500 Internal Server Error".to_string()),
    ]);

    let first = engine
        .send_turn(TurnRequest::new(None, google("key"), "hello"))
        .await
        .unwrap();
    let before = storage.load_thread(&first.thread_id).unwrap();

    let err = engine
        .send_turn(TurnRequest::new(
            Some(first.thread_id.clone()),
            google("key"),
            "again",
        ))
        .await
        .unwrap_err();

    assert!(matches!(kind(&err), Some(ParleyError::Provider { .. })));
    assert!(err.to_string().starts_with("Google error:"));
    assert_eq!(storage.load_thread(&first.thread_id).unwrap(), before);
}

#[tokio::test]
async fn test_missing_key_rejects_before_generation() {
    let (engine, gateway, storage, _tmp) = scripted_engine([]);
    let session = engine.create_session("Google", "gemini-2.5-flash").unwrap();

    let err = engine
        .send_turn(TurnRequest::new(Some(session.id.clone()), google(""), "Hello"))
        .await
        .unwrap_err();

    assert!(matches!(kind(&err), Some(ParleyError::MissingCredential(_))));
    assert_eq!(err.to_string(), "Please enter your Google API key");
    assert!(storage.load_thread(&session.id).unwrap().is_empty());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let (engine, gateway, storage, _tmp) = scripted_engine([]);
    let session = engine.create_session("Google", "gemini-2.5-flash").unwrap();

    let err = engine
        .send_turn(TurnRequest::new(Some(session.id.clone()), google("key"), "  \n"))
        .await
        .unwrap_err();

    assert!(matches!(kind(&err), Some(ParleyError::EmptyInput)));
    assert!(storage.load_thread(&session.id).unwrap().is_empty());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_unsupported_provider() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([]);
    let session = engine.create_session("Mistral", "large").unwrap();

    let config = InvocationConfig::new("Mistral", "large", "key", "");
    let err = engine
        .send_turn(TurnRequest::new(Some(session.id.clone()), config, "Hello"))
        .await
        .unwrap_err();

    assert!(matches!(kind(&err), Some(ParleyError::UnsupportedProvider(_))));
    assert!(storage.load_thread(&session.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_thread_is_not_found() {
    let (engine, gateway, _storage, _tmp) = scripted_engine([]);

    let err = engine
        .send_turn(TurnRequest::new(
            Some("00000000-0000-0000-0000-000000000000".to_string()),
            google("key"),
            "Hello",
        ))
        .await
        .unwrap_err();

    assert!(matches!(kind(&err), Some(ParleyError::NotFound(_))));
    assert!(engine.list_sessions().unwrap().is_empty());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn test_delete_removes_session_and_thread() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([reply("hi"), reply("Greeting")]);
    let turn = engine
        .send_turn(TurnRequest::new(None, google("key"), "hello"))
        .await
        .unwrap();

    engine.delete_session(&turn.thread_id).await.unwrap();

    let err = engine.get_session(&turn.thread_id).unwrap_err();
    assert!(matches!(kind(&err), Some(ParleyError::NotFound(_))));
    assert!(storage.load_thread(&turn.thread_id).unwrap().is_empty());
    assert!(engine.load_thread_for_display(&turn.thread_id).unwrap().is_empty());

    // Deleting again is not an error
    engine.delete_session(&turn.thread_id).await.unwrap();
}

#[tokio::test]
async fn test_streaming_persists_same_thread_as_complete() {
    let answer = "The answer is 4, as always.";
    let (engine, _gateway, storage, _tmp) = scripted_engine([
        reply(answer),
        reply("Arithmetic"),
        reply(answer),
        reply("Arithmetic"),
    ]);

    let complete = engine
        .send_turn(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap();

    let stream = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap();
    let streamed_thread = stream.thread_id().to_string();
    let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

    assert!(fragments.len() > 1);
    assert_eq!(fragments.concat(), answer);
    assert_eq!(
        storage.load_thread(&streamed_thread).unwrap(),
        storage.load_thread(&complete.thread_id).unwrap()
    );
    assert_eq!(engine.get_session(&streamed_thread).unwrap().title, "Arithmetic");
}

#[tokio::test]
async fn test_stream_title_available_after_exhaustion() {
    let (engine, _gateway, _storage, _tmp) = scripted_engine([reply("4"), reply("Math")]);

    let mut stream = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap();
    assert_eq!(stream.title(), None);
    while let Some(fragment) = stream.next().await {
        fragment.unwrap();
    }
    assert_eq!(stream.title().as_deref(), Some("Math"));
}

#[tokio::test]
async fn test_mid_stream_failure_persists_nothing() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([Step::StreamThenFail(
        vec!["Hel".to_string()],
        "connection reset".to_string(),
    )]);

    let mut stream = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "Say hello"))
        .await
        .unwrap();
    let thread = stream.thread_id().to_string();

    assert_eq!(stream.next().await.unwrap().unwrap(), "Hel");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(kind(&err), Some(ParleyError::Provider { .. })));
    assert!(stream.next().await.is_none());

    assert!(storage.load_thread(&thread).unwrap().is_empty());
    assert_eq!(engine.get_session(&thread).unwrap().title, DEFAULT_TITLE);
}

#[tokio::test]
async fn test_dropped_stream_persists_nothing_and_releases_thread() {
    let (engine, _gateway, storage, _tmp) =
        scripted_engine([reply("a long streamed answer"), reply("fine"), reply("Title")]);

    let mut stream = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "first try"))
        .await
        .unwrap();
    let thread = stream.thread_id().to_string();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    assert!(storage.load_thread(&thread).unwrap().is_empty());

    // The lock was released, so the next turn on the thread proceeds
    let turn = engine
        .send_turn(TurnRequest::new(Some(thread.clone()), google("key"), "second try"))
        .await
        .unwrap();
    assert_eq!(turn.message, Message::assistant("fine"));
    assert_eq!(storage.load_thread(&thread).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unrecorded_reply_is_returned_with_error() {
    let (storage, _tmp) = common::create_temp_storage();
    let storage = Arc::new(storage);
    let engine = ConversationEngine::new(
        storage.clone(),
        Arc::new(ReadOnlyCheckpoints {
            inner: storage.clone(),
        }),
        Arc::new(ScriptedGateway::with_steps([reply("4")])),
    );

    let err = engine
        .send_turn(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap_err();

    match kind(&err) {
        Some(ParleyError::UnpersistedReply {
            thread_id, reply, ..
        }) => {
            assert_eq!(reply, "4");
            assert!(storage.load_thread(thread_id).unwrap().is_empty());
        }
        other => panic!("expected UnpersistedReply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unrecorded_stream_ends_with_error() {
    let (storage, _tmp) = common::create_temp_storage();
    let storage = Arc::new(storage);
    let engine = ConversationEngine::new(
        storage.clone(),
        Arc::new(ReadOnlyCheckpoints {
            inner: storage.clone(),
        }),
        Arc::new(ScriptedGateway::with_steps([reply("4")])),
    );

    let stream = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "What is 2+2?"))
        .await
        .unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "4");
    let err = items[1].as_ref().unwrap_err();
    assert!(matches!(
        kind(err),
        Some(ParleyError::UnpersistedReply { reply, .. }) if reply == "4"
    ));
}

#[tokio::test]
async fn test_send_dispatches_on_response_mode() {
    let (engine, _gateway, _storage, _tmp) =
        scripted_engine([reply("one"), reply("T"), reply("two"), reply("T")]);

    match engine
        .send(TurnRequest::new(None, google("key"), "a"), ResponseMode::Complete)
        .await
        .unwrap()
    {
        TurnResponse::Complete(turn) => assert_eq!(turn.message.content, "one"),
        TurnResponse::Stream(_) => panic!("expected a complete reply"),
    }

    match engine
        .send(TurnRequest::new(None, google("key"), "b"), ResponseMode::Stream)
        .await
        .unwrap()
    {
        TurnResponse::Stream(stream) => assert_eq!(stream.collect_text().await.unwrap(), "two"),
        TurnResponse::Complete(_) => panic!("expected a stream"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_on_one_thread_are_serialized() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([]);
    let engine = Arc::new(engine);
    let session = engine.create_session("Google", "gemini-2.5-flash").unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let engine = Arc::clone(&engine);
        let id = session.id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .send_turn(TurnRequest::new(Some(id), google("key"), format!("q{}", i)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let messages = storage.load_thread(&session.id).unwrap();
    assert_eq!(messages.len(), 12);
    for pair in messages.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1], Message::assistant("ok"));
    }
}

#[tokio::test]
async fn test_api_key_never_reaches_the_database() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([reply("4"), reply("Math")]);

    engine
        .send_turn(TurnRequest::new(
            None,
            google("sk-do-not-store-7f3a9c"),
            "What is 2+2?",
        ))
        .await
        .unwrap();

    let bytes = std::fs::read(storage.db_path()).unwrap();
    let needle = b"sk-do-not-store-7f3a9c";
    assert!(!bytes.windows(needle.len()).any(|w| w == needle));
}

#[tokio::test]
async fn test_sessions_listed_most_recent_first() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([]);
    let older = engine.create_session("Google", "gemini-2.5-flash").unwrap();
    let newer = engine.create_session("OpenAI", "gpt-4o").unwrap();

    // A turn on the older session moves it to the front
    engine
        .send_turn(TurnRequest::new(Some(older.id.clone()), google("key"), "bump"))
        .await
        .unwrap();

    let ids: Vec<String> = storage
        .list_sessions()
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_turn_queued_behind_delete_is_not_found() {
    let (engine, _gateway, storage, _tmp) = scripted_engine([reply("first"), reply("Title")]);
    let engine = Arc::new(engine);

    // The first turn holds the thread until its stream is drained
    let held = engine
        .send_turn_streaming(TurnRequest::new(None, google("key"), "a"))
        .await
        .unwrap();
    let thread = held.thread_id().to_string();

    let delete = {
        let engine = Arc::clone(&engine);
        let id = thread.clone();
        tokio::spawn(async move { engine.delete_session(&id).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let late_turn = {
        let engine = Arc::clone(&engine);
        let id = thread.clone();
        tokio::spawn(async move {
            engine
                .send_turn(TurnRequest::new(Some(id), google("key"), "b"))
                .await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(held.collect_text().await.unwrap(), "first");
    delete.await.unwrap().unwrap();

    let err = late_turn.await.unwrap().unwrap_err();
    assert!(matches!(kind(&err), Some(ParleyError::NotFound(_))));
    assert!(storage.get_session(&thread).unwrap().is_none());
    assert!(storage.load_thread(&thread).unwrap().is_empty());
}
