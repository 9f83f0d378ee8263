use super::*;

#[test]
fn stored_message_coerces_numeric_ids() {
    let row: StoredMessage = serde_json::from_value(serde_json::json!({
        "id": 901,
        "authorId": 42,
        "authorName": "Mara",
        "authorColor": "#d94b4b",
        "body": "hello",
        "createdAt": 1_700_000_000_000_i64,
    }))
    .unwrap();

    assert_eq!(row.id, "901");
    assert_eq!(row.author_id, "42");
    assert_eq!(row.created_at, 1_700_000_000_000);
}

#[test]
fn stored_message_color_defaults_to_empty() {
    let row: StoredMessage = serde_json::from_value(serde_json::json!({
        "id": "m-1",
        "authorId": "guest-x",
        "authorName": "Ken",
        "body": "hi",
        "createdAt": 5,
    }))
    .unwrap();

    assert_eq!(row.author_color, "");
}

#[test]
fn history_page_has_more_defaults_false() {
    let page: HistoryPage =
        serde_json::from_value(serde_json::json!({ "messages": [] })).unwrap();
    assert!(page.messages.is_empty());
    assert!(!page.has_more);
}

#[test]
fn conversation_head_reads_wire_field_names() {
    let head: ConversationHead = serde_json::from_value(serde_json::json!({
        "otherUserId": 7,
        "otherUserName": "Iris",
        "lastMessageTime": 123,
    }))
    .unwrap();

    assert_eq!(head.peer_id, "7");
    assert_eq!(head.peer_name, "Iris");
    assert_eq!(head.last_activity, 123);
}

#[test]
fn ticket_summary_reads_wire_field_names() {
    let ticket: TicketSummary = serde_json::from_value(serde_json::json!({
        "userId": "42",
        "userName": "Mara",
        "lastMessage": "help please",
        "lastMessageTime": 456,
        "unreadByAdmin": true,
        "messageCount": 9,
    }))
    .unwrap();

    assert_eq!(ticket.user_id, "42");
    assert!(ticket.unread);
    assert_eq!(ticket.message_count, 9);
}

#[test]
fn ticket_summary_tolerates_sparse_rows() {
    let ticket: TicketSummary = serde_json::from_value(serde_json::json!({
        "userId": 42,
        "userName": "Mara",
    }))
    .unwrap();

    assert_eq!(ticket.last_message, "");
    assert_eq!(ticket.last_activity, 0);
    assert!(!ticket.unread);
    assert_eq!(ticket.message_count, 0);
}

#[test]
fn client_normalizes_trailing_slash_in_base_url() {
    let client = StoreClient::new("https://example.test/api/", "tok").unwrap();
    assert_eq!(client.base_url, "https://example.test/api");
}
