mod common;

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use shardkv_client::{CacheError, ConnectionFault, KeyTtl};

use common::{cluster, spread_keys};

#[test]
fn strings_roundtrip() {
    let cluster = cluster(2);
    let client = &cluster.client;

    client.set_string("greeting", "hello").unwrap();
    assert_eq!(client.get_string("greeting").unwrap().as_deref(), Some("hello"));
    assert_eq!(client.get_string("missing").unwrap(), None);

    assert!(!client.set_string_if_absent("greeting", "other").unwrap());
    assert!(client.set_string_if_absent("fresh", "1").unwrap());

    assert_eq!(client.get_set("greeting", "bye").unwrap().as_deref(), Some("hello"));
    assert_eq!(client.get_string("greeting").unwrap().as_deref(), Some("bye"));

    assert_eq!(client.incr("hits").unwrap(), 1);
    assert_eq!(client.incr("hits").unwrap(), 2);
    assert!(client.exists("hits").unwrap());
    assert!(client.delete_key("hits").unwrap());
    assert!(!client.exists("hits").unwrap());
}

#[test]
fn server_errors_keep_the_original_cause() {
    let cluster = cluster(1);
    let client = &cluster.client;

    client.set_string("text", "abc").unwrap();
    let err = client.incr("text").unwrap_err();
    match err {
        CacheError::Connection { shard, source } => {
            assert_eq!(shard, "shard-0");
            assert!(matches!(source, ConnectionFault::Server(message) if message.contains("not an integer")));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The connection survives a server error reply.
    assert_eq!(client.get_string("text").unwrap().as_deref(), Some("abc"));
}

#[test]
fn ttl_values_expire() {
    let cluster = cluster(1);
    let client = &cluster.client;

    client
        .set_string_with_ttl("session", "token", Duration::from_secs(1))
        .unwrap();
    assert_eq!(client.get_string("session").unwrap().as_deref(), Some("token"));
    assert!(matches!(client.ttl("session").unwrap(), KeyTtl::ExpiresIn(_)));

    thread::sleep(Duration::from_millis(1_200));
    assert_eq!(client.get_string("session").unwrap(), None);
    assert_eq!(client.ttl("session").unwrap(), KeyTtl::Missing);

    client.set_string("plain", "v").unwrap();
    assert_eq!(client.ttl("plain").unwrap(), KeyTtl::NoExpiry);
    assert!(client.expire("plain", Duration::from_secs(60)).unwrap());
    assert!(!client.expire("nope", Duration::from_secs(60)).unwrap());
}

#[test]
fn sub_second_ttls_expire_on_time() {
    let cluster = cluster(2);
    let client = &cluster.client;

    assert!(client
        .hash_set_with_ttl("short:h", "f", "v", Duration::from_millis(500))
        .unwrap());
    client
        .set_string_with_ttl("short:s", "v", Duration::from_millis(500))
        .unwrap();
    client.set_string("short:e", "v").unwrap();
    assert!(client.expire("short:e", Duration::from_millis(900)).unwrap());

    assert!(client.exists("short:h").unwrap());
    assert_eq!(client.get_string("short:s").unwrap().as_deref(), Some("v"));
    assert!(client.exists("short:e").unwrap());

    thread::sleep(Duration::from_millis(650));
    assert!(!client.exists("short:h").unwrap());
    assert_eq!(client.get_string("short:s").unwrap(), None);
    assert!(client.exists("short:e").unwrap());

    thread::sleep(Duration::from_millis(500));
    assert!(!client.exists("short:e").unwrap());
}

#[test]
fn hashes() {
    let cluster = cluster(2);
    let client = &cluster.client;

    assert!(client.hash_set("user:1", "name", "ada").unwrap());
    assert!(!client.hash_set("user:1", "name", "ada l.").unwrap());
    assert_eq!(client.hash_get("user:1", "name").unwrap().as_deref(), Some("ada l."));

    let mut fields = HashMap::new();
    fields.insert("lang".to_string(), "en".to_string());
    fields.insert("role".to_string(), "admin".to_string());
    client.hash_multiple_set("user:1", &fields).unwrap();
    assert_eq!(client.hash_len("user:1").unwrap(), 3);

    assert_eq!(
        client.hash_multiple_get("user:1", &["role", "missing", "lang"]).unwrap(),
        vec![Some("admin".to_string()), None, Some("en".to_string())]
    );

    let all = client.hash_get_all("user:1").unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all["name"], "ada l.");

    assert_eq!(client.hash_delete_fields("user:1", &["role", "missing"]).unwrap(), 1);
    assert_eq!(client.hash_len("user:1").unwrap(), 2);
    assert!(client.hash_get_all("nobody").unwrap().is_empty());
}

#[test]
fn hash_ttl_variants_refresh_expiry() {
    let cluster = cluster(1);
    let client = &cluster.client;
    let ttl = Duration::from_secs(100);

    assert!(client.hash_set_with_ttl("h", "a", "1", ttl).unwrap());
    assert!(matches!(client.ttl("h").unwrap(), KeyTtl::ExpiresIn(left) if left > Duration::from_secs(90)));

    let mut fields = HashMap::new();
    fields.insert("b".to_string(), "2".to_string());
    client.hash_multiple_set_with_ttl("h", &fields, ttl).unwrap();
    assert_eq!(client.hash_get_with_ttl("h", "b", ttl).unwrap().as_deref(), Some("2"));
    assert_eq!(
        client.hash_multiple_get_with_ttl("h", &["a", "b"], ttl).unwrap(),
        vec![Some("1".to_string()), Some("2".to_string())]
    );
    assert_eq!(client.hash_get_all_with_ttl("h", ttl).unwrap().len(), 2);
    assert!(matches!(client.ttl("h").unwrap(), KeyTtl::ExpiresIn(_)));
}

#[test]
fn lists() {
    let cluster = cluster(2);
    let client = &cluster.client;

    assert_eq!(client.list_push_end("jobs", &["a", "b", "c"]).unwrap(), 3);
    assert_eq!(client.list_push_head("jobs", "z").unwrap(), 4);
    assert_eq!(client.list_get_all("jobs").unwrap(), vec!["z", "a", "b", "c"]);
    assert_eq!(client.list_range("jobs", 1, 3).unwrap(), vec!["a", "b"]);
    assert_eq!(client.list_len("jobs").unwrap(), 4);

    assert_eq!(client.list_pop_head("jobs").unwrap().as_deref(), Some("z"));
    assert_eq!(client.list_pop_end("jobs").unwrap().as_deref(), Some("c"));

    client.list_push_end("jobs", &["a", "a"]).unwrap();
    assert_eq!(client.list_remove("jobs", 0, "a").unwrap(), 3);
    assert_eq!(client.list_get_all("jobs").unwrap(), vec!["b"]);
    assert_eq!(client.list_pop_end("empty").unwrap(), None);
}

#[test]
fn push_head_and_trim_keeps_newest() {
    let cluster = cluster(1);
    let client = &cluster.client;

    assert_eq!(client.list_push_head_and_trim("recent", "a", 2).unwrap(), 1);
    assert_eq!(client.list_push_head_and_trim("recent", "b", 2).unwrap(), 2);
    assert_eq!(client.list_push_head_and_trim("recent", "c", 2).unwrap(), 3);
    assert_eq!(client.list_get_all("recent").unwrap(), vec!["c", "b"]);

    assert_eq!(client.list_push_head_and_trim("huge", "x", usize::MAX).unwrap(), 1);
    assert_eq!(client.list_get_all("huge").unwrap(), vec!["x"]);
}

#[test]
fn list_rewrites() {
    let cluster = cluster(2);
    let client = &cluster.client;

    client.batch_list_push_tail("feed", &["1", "2"], false).unwrap();
    client.batch_list_push_tail("feed", &["3"], false).unwrap();
    assert_eq!(client.list_get_all("feed").unwrap(), vec!["1", "2", "3"]);

    client.batch_list_push_tail("feed", &["x", "y"], true).unwrap();
    assert_eq!(client.list_get_all("feed").unwrap(), vec!["x", "y"]);

    client.update_list_in_transaction("feed", &["only"]).unwrap();
    assert_eq!(client.list_get_all("feed").unwrap(), vec!["only"]);

    assert_eq!(client.insert_list_if_not_exists("feed", &["ignored"]).unwrap(), 0);
    assert_eq!(client.insert_list_if_not_exists("new-feed", &["p", "q"]).unwrap(), 2);
    assert_eq!(client.list_get_all("new-feed").unwrap(), vec!["p", "q"]);

    // The lock used by the rewrites is gone afterwards.
    assert!(client.lock("feed").try_acquire().unwrap().is_some());
}

#[test]
fn sets_and_sorted_sets() {
    let cluster = cluster(2);
    let client = &cluster.client;

    assert_eq!(client.set_add("tags", &["rust", "cache", "rust"]).unwrap(), 2);
    assert!(client.set_is_member("tags", "cache").unwrap());
    assert!(!client.set_is_member("tags", "java").unwrap());

    assert!(client.sorted_set_add("scores", 10.0, "ann").unwrap());
    assert!(client.sorted_set_add("scores", 30.0, "bob").unwrap());
    assert!(client.sorted_set_add("scores", 20.0, "cat").unwrap());
    assert!(!client.sorted_set_add("scores", 25.0, "cat").unwrap());

    assert_eq!(
        client.sorted_set_rev_range_by_score("scores", f64::INFINITY, 20.0).unwrap(),
        vec!["bob", "cat"]
    );
    assert_eq!(client.sorted_set_remove_range_by_score("scores", 0.0, 15.0).unwrap(), 1);
    assert_eq!(client.sorted_set_remove("scores", &["bob", "zed"]).unwrap(), 1);
    assert_eq!(
        client.sorted_set_rev_range_by_score("scores", 100.0, 0.0).unwrap(),
        vec!["cat"]
    );
}

#[test]
fn multi_key_deletes_span_shards() {
    let cluster = cluster(3);
    let client = &cluster.client;
    let keys = spread_keys(client, "del", 20);

    for key in &keys {
        client.set_string(key, "v").unwrap();
    }
    let mut targets = keys.clone();
    targets.push("del:missing".to_string());
    assert_eq!(client.delete_keys(&targets).unwrap(), 20);
    assert!(keys.iter().all(|key| !client.exists(key).unwrap()));
}

#[test]
fn delete_by_prefix_reaches_every_shard() {
    let cluster = cluster(3);
    let client = &cluster.client;
    let keys = spread_keys(client, "tmp", 15);

    for key in &keys {
        client.set_string(key, "v").unwrap();
    }
    client.set_string("keep:me", "v").unwrap();

    assert_eq!(client.delete_keys_like("tmp:").unwrap(), 15);
    assert!(client.exists("keep:me").unwrap());
    assert_eq!(client.delete_keys_like("tmp:").unwrap(), 0);
}

#[test]
fn hash_tags_colocate_keys() {
    let cluster = cluster(3);
    let client = &cluster.client;

    let owner = client.shard_for("{order:7}").name.clone();
    for suffix in ["items", "total", "status"] {
        assert_eq!(client.shard_for(&format!("{{order:7}}:{}", suffix)).name, owner);
    }
}
