#[path = "helpers/mod.rs"]
mod helpers;

use helpers::fixtures::{PNG_BYTES, TEXT_CONTENT};
use helpers::setup_test_env;
use mockito::Matcher;
use satchel_uploader::{UploadError, UploaderState};

#[tokio::test]
async fn test_download_rejects_non_http_schemes() {
    let env = setup_test_env();
    let mut uploader = env.uploader();

    for uri in ["ftp://host/file", "file:///etc/passwd", "/etc/passwd"] {
        let err = uploader.download(uri).await.unwrap_err();
        assert!(matches!(err, UploadError::Download(_)), "{}: {:?}", uri, err);
    }
    assert_eq!(uploader.state(), UploaderState::Empty);
}

#[tokio::test]
async fn test_download_blank_uri_is_a_noop() {
    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader.download("").await.unwrap();
    uploader.download("   ").await.unwrap();
    assert!(uploader.is_blank());
}

#[tokio::test]
async fn test_download_caches_remote_file() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/files/test.txt")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(TEXT_CONTENT)
        .expect(1)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/files/test.txt", server.url()))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(uploader.state(), UploaderState::Cached);
    assert!(uploader.cache_name().unwrap().ends_with("/test.txt"));
    assert_eq!(
        uploader.read().await.unwrap().unwrap().as_ref(),
        TEXT_CONTENT
    );
}

#[tokio::test]
async fn test_download_corrects_extension_from_content_type() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/file.jpg")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(PNG_BYTES)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/file.jpg", server.url()))
        .await
        .unwrap();

    let cache_name = uploader.cache_name().unwrap();
    assert!(cache_name.ends_with("/file.jpg.png"), "{}", cache_name);
    assert_eq!(uploader.content_type().as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_download_appends_preferred_extension() {
    let mut server = mockito::Server::new_async().await;
    let _readme = server
        .mock("GET", "/readme")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(TEXT_CONTENT)
        .create_async()
        .await;
    let _photo = server
        .mock("GET", "/photo.png")
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body(PNG_BYTES)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/readme", server.url()))
        .await
        .unwrap();
    assert!(uploader.cache_name().unwrap().ends_with("/readme.txt"));

    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/photo.png", server.url()))
        .await
        .unwrap();
    let cache_name = uploader.cache_name().unwrap();
    assert!(cache_name.ends_with("/photo.png.jpeg"), "{}", cache_name);
}

#[tokio::test]
async fn test_download_keeps_name_when_extension_disabled() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/file.jpg")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(PNG_BYTES)
        .create_async()
        .await;

    let env = setup_test_env();
    env.scope
        .set("set_file_extension_by_mime_type", false)
        .unwrap();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/file.jpg", server.url()))
        .await
        .unwrap();
    assert!(uploader.cache_name().unwrap().ends_with("/file.jpg"));
}

#[tokio::test]
async fn test_download_names_file_after_redirect_target() {
    let mut server = mockito::Server::new_async().await;
    let _redirect = server
        .mock("GET", "/latest")
        .with_status(302)
        .with_header("location", "/assets/photo.png")
        .create_async()
        .await;
    let _target = server
        .mock("GET", "/assets/photo.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(PNG_BYTES)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/latest", server.url()))
        .await
        .unwrap();
    assert!(uploader.cache_name().unwrap().ends_with("/photo.png"));
}

#[tokio::test]
async fn test_download_failure_leaves_uploader_empty() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/gone.png")
        .with_status(404)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    let err = uploader
        .download(&format!("{}/gone.png", server.url()))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Download(_)));
    assert_eq!(uploader.cache_name(), None);
}

#[tokio::test]
async fn test_download_then_store() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", Matcher::Regex(r"^/docs/report".to_string()))
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body(TEXT_CONTENT)
        .create_async()
        .await;

    let env = setup_test_env();
    let mut uploader = env.uploader();
    uploader
        .download(&format!("{}/docs/report final.txt", server.url()))
        .await
        .unwrap();
    let stored = uploader.store(None).await.unwrap().unwrap();

    assert_eq!(stored.identifier(), "report_final.txt");
    assert_eq!(
        std::fs::read(env.store_path().join("report_final.txt")).unwrap(),
        TEXT_CONTENT
    );
}
