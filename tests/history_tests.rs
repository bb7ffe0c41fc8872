use ollama_chat::error::ChatError;
use ollama_chat::history::{ HistoryEntry, HistoryStore, JsonHistoryStore };
use ollama_chat::models::{ ChatMessage, Conversation, Parameters };
use tempfile::TempDir;

fn sample_conversation() -> Conversation {
    let mut conversation = Conversation::new();
    conversation.messages.push(ChatMessage::user("Hello"));
    conversation.messages.push(ChatMessage::assistant("Hi there!"));
    conversation.messages.push(ChatMessage::user("Tell me a joke"));
    let mut cut = ChatMessage::assistant("Why did the");
    cut.cancelled = true;
    conversation.messages.push(cut);
    conversation
}

fn sample_entry(name: &str) -> HistoryEntry {
    let mut params = Parameters::default();
    params.set("top_k", "12").unwrap();
    HistoryEntry::new(name, &sample_conversation(), "mistral:7b", "Be brief.", &params)
}

#[tokio::test]
async fn saved_entries_load_back_unchanged() {
    let tmp = TempDir::new().unwrap();
    let store = JsonHistoryStore::new(tmp.path().join("chat_history"));
    let entry = sample_entry("notes");

    let path = store.save_entry(&entry, "notes").await.unwrap();
    assert_eq!(path, tmp.path().join("chat_history").join("notes.json"));
    assert!(tmp.path().join("chat_history").join("notes.txt").exists());

    let loaded = store.load_entry("notes").await.unwrap();
    assert_eq!(loaded, entry);
    assert!(loaded.messages[3].cancelled);
    assert_eq!(loaded.parameters.top_k, 12);

    let conversation = store.load_conversation("notes.json").await.unwrap();
    assert_eq!(conversation.name.as_deref(), Some("notes"));
    assert_eq!(conversation.messages, entry.messages);
}

#[tokio::test]
async fn transcript_is_written_next_to_the_entry() {
    let tmp = TempDir::new().unwrap();
    let store = JsonHistoryStore::new(tmp.path());
    store.save_entry(&sample_entry("notes"), "notes").await.unwrap();

    let text = std::fs::read_to_string(tmp.path().join("notes.txt")).unwrap();
    assert!(text.starts_with("Chat with Ollama (mistral:7b) - "));
    assert!(text.contains("[1] User: Hello"));
    assert!(text.contains("[2] Assistant: Why did the [cancelled]"));
    assert!(text.contains(&"-".repeat(80)));
}

#[tokio::test]
async fn lists_saved_ids_in_order() {
    let tmp = TempDir::new().unwrap();
    let store = JsonHistoryStore::new(tmp.path().join("missing"));
    assert!(store.list_conversations().await.unwrap().is_empty());

    let store = JsonHistoryStore::new(tmp.path());
    for id in ["zeta", "alpha", "chat_20240101_120000"] {
        store.save_conversation(&sample_conversation(), id).await.unwrap();
    }
    std::fs::write(tmp.path().join("stray.log"), "not a chat").unwrap();

    assert_eq!(
        store.list_conversations().await.unwrap(),
        vec!["alpha", "chat_20240101_120000", "zeta"]
    );
}

#[tokio::test]
async fn rename_moves_entry_and_transcript() {
    let tmp = TempDir::new().unwrap();
    let store = JsonHistoryStore::new(tmp.path());
    store.save_entry(&sample_entry("draft"), "draft").await.unwrap();

    let path = store.rename_conversation("draft", "final").await.unwrap();
    assert_eq!(path, tmp.path().join("final.json"));
    assert!(!tmp.path().join("draft.json").exists());
    assert!(!tmp.path().join("draft.txt").exists());
    assert!(tmp.path().join("final.txt").exists());

    let loaded = store.load_entry("final").await.unwrap();
    assert_eq!(loaded.chat_name, "final");
    assert_eq!(loaded.messages.len(), 4);
    assert_eq!(store.list_conversations().await.unwrap(), vec!["final"]);
}

#[tokio::test]
async fn rename_refuses_to_overwrite() {
    let tmp = TempDir::new().unwrap();
    let store = JsonHistoryStore::new(tmp.path());
    store.save_entry(&sample_entry("a"), "a").await.unwrap();
    store.save_entry(&sample_entry("b"), "b").await.unwrap();

    let err = store.rename_conversation("a", "b").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(store.load_entry("a").await.unwrap().chat_name, "a");
    assert_eq!(store.load_entry("b").await.unwrap().chat_name, "b");
}

#[tokio::test]
async fn reads_legacy_exchange_format() {
    let tmp = TempDir::new().unwrap();
    let legacy =
        r#"{
        "model": "llama3.2",
        "timestamp": "2024-03-01 10:00:00",
        "system_prompt": "",
        "parameters": {"temperature": 0.5, "top_p": 0.9, "top_k": 40, "max_tokens": 2000},
        "conversation": [
            {"user": "Hello", "assistant": "Hi!"},
            {"user": "Bye", "assistant": "Goodbye."}
        ]
    }"#;
    std::fs::write(tmp.path().join("old_chat.json"), legacy).unwrap();
    let store = JsonHistoryStore::new(tmp.path());

    let entry = store.load_entry("old_chat").await.unwrap();
    assert_eq!(entry.chat_name, "old_chat");
    assert_eq!(entry.model, "llama3.2");
    assert_eq!(entry.parameters.temperature, 0.5);
    let contents: Vec<&str> = entry.messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["Hello", "Hi!", "Bye", "Goodbye."]);
}

#[tokio::test]
async fn reads_parameters_saved_as_floats() {
    let tmp = TempDir::new().unwrap();
    let legacy =
        r#"{
        "model": "llama3.2",
        "timestamp": "2024-03-01 10:00:00",
        "system_prompt": "Be brief.",
        "parameters": {"temperature": 0.7, "top_p": 0.9, "top_k": 40.0, "max_tokens": 2000.0},
        "conversation": [{"user": "Hello", "assistant": "Hi!"}]
    }"#;
    std::fs::write(tmp.path().join("old.json"), legacy).unwrap();
    let store = JsonHistoryStore::new(tmp.path());

    let entry = store.load_entry("old").await.unwrap();
    assert_eq!(entry.parameters, Parameters::default());
    assert_eq!(entry.system_prompt, "Be brief.");
    assert_eq!(entry.messages.len(), 2);
}

#[tokio::test]
async fn unreadable_entries_are_errors() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
    let store = JsonHistoryStore::new(tmp.path());

    assert!(matches!(store.load_entry("broken").await, Err(ChatError::Config(_))));
    assert!(matches!(store.load_entry("absent").await, Err(ChatError::Config(_))));
    assert!(matches!(store.load_entry("../escape").await, Err(ChatError::Validation(_))));
    assert!(
        matches!(store.save_conversation(&sample_conversation(), "").await, Err(ChatError::Validation(_)))
    );
}
