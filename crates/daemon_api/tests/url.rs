use daemon_api::url::{conversation_endpoint, conversations_endpoint, stream_endpoint};
use daemon_api::normalize_base_url;

#[test]
fn url_normalization_defaults_blank_input() {
    assert_eq!(normalize_base_url("   "), "http://localhost:8080");
}

#[test]
fn url_normalization_drops_trailing_slash_and_api_suffix() {
    assert_eq!(normalize_base_url("http://daemon:9000/"), "http://daemon:9000");
    assert_eq!(normalize_base_url("http://daemon:9000/api/"), "http://daemon:9000");
    assert_eq!(
        normalize_base_url("https://host/prefix/api"),
        "https://host/prefix"
    );
}

#[test]
fn url_stream_endpoint_appends_conversation_segments() {
    let url = stream_endpoint("http://daemon:9000/api", "c-42").expect("stream url");
    assert_eq!(
        url.as_str(),
        "http://daemon:9000/api/conversations/c-42/messages/stream"
    );
}

#[test]
fn url_conversation_id_is_percent_encoded() {
    let url = conversation_endpoint("https://host/prefix", "a/b c").expect("conversation url");
    assert_eq!(url.as_str(), "https://host/prefix/api/conversations/a%2Fb%20c");
}

#[test]
fn url_participant_query_is_optional() {
    let all = conversations_endpoint("http://daemon", None).expect("list url");
    assert_eq!(all.as_str(), "http://daemon/api/conversations");

    let scoped = conversations_endpoint("http://daemon", Some("helper bot")).expect("scoped url");
    assert_eq!(
        scoped.as_str(),
        "http://daemon/api/conversations?participant=helper+bot"
    );

    let blank = conversations_endpoint("http://daemon", Some("  ")).expect("blank url");
    assert_eq!(blank.query(), None);
}

#[test]
fn url_rejects_unparsable_base() {
    assert!(stream_endpoint("not a url", "c1").is_err());
}
