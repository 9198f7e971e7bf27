mod support;

use std::collections::BTreeMap;

use portal_core::{FileToUpload, Fingerprint};
use portal_engine::{
    ApiError, ApiRoutes, ConvertConfig, HttpPortalApi, ImportConfig, OaiPmhConfig, PortalApi,
    ResourceSyncConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::init_logging;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> HttpPortalApi {
    let routes = ApiRoutes::new(&format!("{}/api", server.uri()), "repo", "ds").unwrap();
    HttpPortalApi::new(routes).unwrap()
}

#[tokio::test]
async fn listing_reads_server_file_metadata() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/repo/ds/files/input"))
        .and(query_param("prefix", "ead/"))
        .and(query_param("after", "ead/a.xml"))
        .and(header("X-Requested-With", "XMLHttpRequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{
                "key": "ead/b.xml",
                "size": 120,
                "lastModified": "2024-01-01T00:00:00Z",
                "eTag": "\"abc\"",
                "classifier": "input",
            }],
            "truncated": true,
        })))
        .mount(&server)
        .await;

    let list = api_for(&server)
        .list_files("input", "ead/", Some("ead/a.xml"))
        .await
        .unwrap();

    assert!(list.truncated);
    assert_eq!(list.files.len(), 1);
    assert_eq!(list.files[0].key, "ead/b.xml");
    assert_eq!(list.files[0].size, 120);
    assert_eq!(list.files[0].etag.as_deref(), Some("\"abc\""));
}

#[tokio::test]
async fn file_urls_are_keyed_by_path() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/files/input/urls"))
        .and(body_json(json!(["a.xml"])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"a.xml": "http://s3/a.xml?sig=1"})),
        )
        .mount(&server)
        .await;

    let urls = api_for(&server)
        .file_urls("input", &["a.xml".to_string()])
        .await
        .unwrap();
    assert_eq!(urls.get("a.xml").map(String::as_str), Some("http://s3/a.xml?sig=1"));
}

#[tokio::test]
async fn validation_sends_fingerprints_and_fills_clean_results() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/files/input/validate"))
        .and(body_json(json!({"e1": "a.xml", "e2": "b.xml"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "a.xml", "eTag": "e1", "errors": [{"line": 3, "pos": 7, "error": "bad"}]},
        ])))
        .mount(&server)
        .await;

    let mut files = BTreeMap::new();
    files.insert(Fingerprint::from_etag("e1"), "a.xml".to_string());
    files.insert(Fingerprint::from_etag("e2"), "b.xml".to_string());
    let results = api_for(&server).validate_files("input", &files).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].fingerprint, Fingerprint::from_etag("e1"));
    assert_eq!(results[0].errors[0].line, 3);
    assert_eq!(results[0].errors[0].message, "bad");
    assert!(results[1].is_valid());
}

#[tokio::test]
async fn upload_handle_and_ingest_round_trip() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/files/input/upload"))
        .and(body_json(json!({"name": "a.xml", "type": "text/xml", "size": 4})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"presignedUrl": "http://s3/put"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/ingest"))
        .and(body_json(json!({
            "config": {
                "allowUpdates": false,
                "useSourceId": false,
                "tolerant": true,
                "logMessage": "import",
            },
            "commit": false,
            "files": ["a.xml"],
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jobId": "j-1", "url": "ws://portal/jobs/j-1"})),
        )
        .mount(&server)
        .await;

    let api = api_for(&server);
    let handle = api
        .upload_handle("input", &FileToUpload::new("a.xml", "text/xml", 4))
        .await
        .unwrap();
    assert_eq!(handle.presigned_url, "http://s3/put");

    let mut config = ImportConfig::new("import");
    config.tolerant = true;
    let job = api
        .ingest_files(&["a.xml".to_string()], &config, false)
        .await
        .unwrap();
    assert_eq!(job.job_id, "j-1");
    assert_eq!(job.monitor_url, "ws://portal/jobs/j-1");
}

#[tokio::test]
async fn cancel_reports_acknowledgement_and_errors_carry_the_message() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/repo/jobs/j-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/repo/jobs/j-2"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "no such job"})))
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert!(api.cancel_job("j-1", None).await.unwrap().ok);
    assert_eq!(
        api.cancel_job("j-2", None).await.unwrap_err(),
        ApiError::Status {
            status: 404,
            message: "no such job".to_string(),
        }
    );
}

#[tokio::test]
async fn cancel_goes_to_the_url_the_job_named() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/jobs/c-2/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let cancel_url = format!("{}/jobs/c-2/cancel", server.uri());
    let response = api_for(&server)
        .cancel_job("c-2", Some(&cancel_url))
        .await
        .unwrap();
    assert!(response.ok);
}

#[tokio::test]
async fn convert_job_posts_mappings_for_one_key_or_the_whole_stage() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/convert"))
        .and(query_param("key", "ead/a.xml"))
        .and(body_json(json!({
            "mappings": [["ead", "ead3"], ["ead3", "html"]],
            "force": true,
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jobId": "c-1", "url": "ws://portal/jobs/c-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/convert"))
        .and(body_json(json!({"mappings": [], "force": false})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jobId": "c-2", "url": "ws://portal/jobs/c-2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let config = ConvertConfig {
        mappings: vec![
            ("ead".to_string(), "ead3".to_string()),
            ("ead3".to_string(), "html".to_string()),
        ],
        force: true,
    };
    let job = api.convert_files(Some("ead/a.xml"), &config).await.unwrap();
    assert_eq!(job.job_id, "c-1");
    assert_eq!(job.monitor_url, "ws://portal/jobs/c-1");

    let job = api
        .convert_files(None, &ConvertConfig::default())
        .await
        .unwrap();
    assert_eq!(job.job_id, "c-2");
}

#[tokio::test]
async fn harvest_job_posts_the_endpoint_and_since_flag() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/harvest"))
        .and(query_param("fromLast", "false"))
        .and(body_json(json!({
            "url": "http://oai.example/provider",
            "format": "ead",
            "set": "letters",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "h-1",
            "url": "ws://portal/jobs/h-1",
            "cancelUrl": "http://portal/jobs/h-1/cancel",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = OaiPmhConfig {
        url: "http://oai.example/provider".to_string(),
        format: "ead".to_string(),
        set: Some("letters".to_string()),
    };
    let job = api_for(&server).harvest(&config, false).await.unwrap();
    assert_eq!(job.job_id, "h-1");
    assert_eq!(job.cancel_url.as_deref(), Some("http://portal/jobs/h-1/cancel"));
}

#[tokio::test]
async fn sync_job_omits_an_unset_filter() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/sync"))
        .and(body_json(json!({"url": "http://rs.example/capabilitylist.xml"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jobId": "s-1", "url": "ws://portal/jobs/s-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/repo/ds/sync"))
        .and(body_json(json!({
            "url": "http://rs.example/capabilitylist.xml",
            "filter": "^ead/",
        })))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "sync running"})))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let mut config = ResourceSyncConfig {
        url: "http://rs.example/capabilitylist.xml".to_string(),
        filter: None,
    };
    assert_eq!(api.sync(&config).await.unwrap().job_id, "s-1");

    config.filter = Some("^ead/".to_string());
    assert_eq!(
        api.sync(&config).await.unwrap_err(),
        ApiError::Status {
            status: 409,
            message: "sync running".to_string(),
        }
    );
}

#[tokio::test]
async fn convert_url_needs_no_request() {
    let routes = ApiRoutes::new("http://portal/api", "repo", "ds").unwrap();
    let api = HttpPortalApi::new(routes).unwrap();
    assert_eq!(
        api.convert_file_url("input", "a.xml").unwrap(),
        "http://portal/api/repo/ds/convert/input?key=a.xml"
    );
}
