//! End-to-end uploads against the in-process fake gateway.
//!
//! These go through the real `reqwest` transport over loopback HTTP, so they exercise the exact
//! requests the library puts on the wire.  Retry delays are shrunk to milliseconds so the retry
//! tests finish quickly.
use crate::{progress::TestUploadProgressCallback, Result};
use assert_matches::assert_matches;
use forge_oss::{
    Config, ForgeOssError, RetryPolicy, StaticAccessToken, ThreeLeggedAuth, TwoLeggedAuth,
    UploadJobBuilder, UploadResult,
};
use forge_oss_testing::fake_gateway::{FakeGateway, Route};
use forge_oss_testing::logging::test_with_logging;
use forge_oss_testing::test_data::TestFile;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;

const BUCKET: &str = "integration-bucket";

fn test_config(chunk_size: &str) -> Config {
    Config {
        chunk_size: byte_unit::Byte::from_str(chunk_size).unwrap(),
        min_chunk_size: byte_unit::Byte::from_bytes(1),
        gateway_retry: RetryPolicy {
            delays: vec![Duration::from_millis(10)],
            ..RetryPolicy::storage_gateway()
        },
        part_upload_retry: RetryPolicy {
            delays: vec![
                Duration::from_millis(1),
                Duration::from_millis(3),
                Duration::from_millis(10),
            ],
            ..RetryPolicy::signed_url_put()
        },
        ..Config::default()
    }
}

fn user_auth(gateway: &FakeGateway) -> Arc<ThreeLeggedAuth> {
    Arc::new(ThreeLeggedAuth::new(
        gateway.base_url(),
        StaticAccessToken::new("integration-token"),
    ))
}

/// Upload `file` with default test settings, returning the result and the recorded progress
async fn upload(
    gateway: &FakeGateway,
    file: &TestFile,
    chunk_size: &str,
) -> forge_oss::Result<(UploadResult, TestUploadProgressCallback)> {
    let job = UploadJobBuilder::new(test_config(chunk_size), user_auth(gateway), BUCKET)
        .build(file.path())
        .await?;

    let progress = TestUploadProgressCallback::new();
    let result = job
        .run(futures::future::pending(), progress.clone())
        .await?;

    Ok((result, progress))
}

/// The sizes of the bodies of every part PUT, in the order they were received
fn part_sizes(gateway: &FakeGateway) -> Vec<usize> {
    gateway
        .requests_for(Route::UploadPart)
        .iter()
        .map(|request| request.body.len())
        .collect()
}

#[test]
fn uploads_file_in_one_batch() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("model.rvt", "10 KiB")?;

        let (result, progress) = upload(&gateway, &file, "4 KiB").await?;
        progress.sanity_check_updates();

        assert_eq!(result.bucket_key, BUCKET);
        assert_eq!(result.object_key, "model.rvt");
        assert_eq!(result.size, 10 * 1024);
        assert_eq!(
            result.object_id,
            format!("urn:adsk.objects:os.object:{BUCKET}/model.rvt")
        );

        assert_eq!(part_sizes(&gateway), vec![4096, 4096, 2048]);
        assert_eq!(gateway.requests_for(Route::SignedUrls).len(), 1);
        assert_eq!(gateway.session_count(), 1);

        let object = gateway.object(BUCKET, "model.rvt").unwrap();
        assert_eq!(object.data, file.data());

        Ok(())
    })
}

#[test]
fn uploads_file_in_multiple_batches() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("big.bin", "30 KiB")?;

        let (result, progress) = upload(&gateway, &file, "1 KiB").await?;
        progress.sanity_check_updates();
        assert_eq!(progress.batches_acquired(), vec![(0, 1, 25), (1, 26, 5)]);

        assert_eq!(result.size, file.len());
        assert_eq!(part_sizes(&gateway), vec![1024; 30]);

        let signed_url_requests = gateway.requests_for(Route::SignedUrls);
        assert_eq!(signed_url_requests.len(), 2);

        let first = &signed_url_requests[0];
        assert_eq!(first.query_param("firstPart").as_deref(), Some("1"));
        assert_eq!(first.query_param("parts").as_deref(), Some("25"));
        assert_eq!(first.query_param("minutesExpiration").as_deref(), Some("60"));
        assert_eq!(first.query_param("uploadKey"), None);

        let second = &signed_url_requests[1];
        assert_eq!(second.query_param("firstPart").as_deref(), Some("26"));
        assert_eq!(second.query_param("parts").as_deref(), Some("5"));
        assert_eq!(second.query_param("uploadKey").as_deref(), Some("upload-1"));

        // Everything went into one session
        assert_eq!(gateway.session_count(), 1);
        let object = gateway.object(BUCKET, "big.bin").unwrap();
        assert_eq!(object.upload_key, "upload-1");
        assert_eq!(object.data, file.data());

        Ok(())
    })
}

#[test]
fn file_size_is_exact_multiple_of_chunk_size() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("exact.bin", "8 KiB")?;

        upload(&gateway, &file, "4 KiB").await?;

        assert_eq!(part_sizes(&gateway), vec![4096, 4096]);
        assert_eq!(
            gateway.object(BUCKET, "exact.bin").unwrap().data,
            file.data()
        );

        Ok(())
    })
}

#[test]
fn uploads_empty_file() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::with_data("empty.txt", Vec::new())?;
        assert!(file.is_empty());

        let (result, progress) = upload(&gateway, &file, "4 KiB").await?;
        progress.sanity_check_updates();

        assert_eq!(result.size, 0);
        assert_eq!(part_sizes(&gateway), vec![0]);
        assert!(gateway.object(BUCKET, "empty.txt").unwrap().data.is_empty());

        Ok(())
    })
}

#[test]
fn object_key_is_encoded_as_one_segment() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("local.bin", "3 KiB")?;
        let object_key = "projects/house #2/model v1.rvt";

        let job = UploadJobBuilder::new(test_config("4 KiB"), user_auth(&gateway), BUCKET)
            .object_key(object_key)
            .build(file.path())
            .await?;
        let result = job.run_without_progress(futures::future::pending()).await?;

        assert_eq!(result.object_key, object_key);
        assert_eq!(gateway.object(BUCKET, object_key).unwrap().data, file.data());

        Ok(())
    })
}

#[test]
fn wire_headers() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("headers.bin", "5 KiB")?;

        upload(&gateway, &file, "4 KiB").await?;

        for request in gateway.requests_for(Route::SignedUrls) {
            assert_eq!(
                request.header("authorization"),
                Some("Bearer integration-token")
            );
        }

        for request in gateway.requests_for(Route::UploadPart) {
            // The signed URL is the authorization
            assert_eq!(request.header("authorization"), None);
            assert_eq!(
                request.header("content-type"),
                Some("application/octet-stream")
            );
            assert_eq!(
                request.header("content-length"),
                Some(request.body.len().to_string().as_str())
            );
        }

        let complete = gateway.requests_for(Route::CompleteUpload);
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].uri.query(), None);
        assert_eq!(complete[0].header("content-type"), Some("application/json"));
        assert_eq!(
            complete[0].header("x-ads-meta-content-type"),
            Some("application/octet-stream")
        );
        let body: serde_json::Value = serde_json::from_slice(&complete[0].body)?;
        assert_eq!(
            body,
            serde_json::json!({ "uploadKey": "upload-1", "size": 5 * 1024 })
        );

        Ok(())
    })
}

#[test]
fn two_legged_auth_fetches_token_per_call() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("app.bin", "6 KiB")?;

        let auth = TwoLeggedAuth::new(gateway.base_url(), "client-id", "client-secret");
        let job = UploadJobBuilder::new(test_config("4 KiB"), Arc::new(auth), BUCKET)
            .build(file.path())
            .await?;
        job.run_without_progress(futures::future::pending()).await?;

        // One signed URL request plus one finalize, each with a fresh token
        let tokens = gateway.requests_for(Route::Token);
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0]
            .header("authorization")
            .unwrap()
            .starts_with("Basic "));

        assert_eq!(
            gateway.requests_for(Route::SignedUrls)[0].header("authorization"),
            Some("Bearer fake-token-1")
        );
        assert_eq!(
            gateway.requests_for(Route::CompleteUpload)[0].header("authorization"),
            Some("Bearer fake-token-2")
        );

        Ok(())
    })
}

#[test]
fn rejected_client_credentials() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_next(Route::Token, StatusCode::UNAUTHORIZED, "bad client");
        let file = TestFile::new("app.bin", "1 KiB")?;

        let auth = TwoLeggedAuth::new(gateway.base_url(), "client-id", "wrong-secret");
        let result = UploadJobBuilder::new(test_config("4 KiB"), Arc::new(auth), BUCKET)
            .build(file.path())
            .await?
            .run_without_progress(futures::future::pending())
            .await;

        assert_matches!(
            result,
            Err(ForgeOssError::TokenRejected { status, .. }) if status == StatusCode::UNAUTHORIZED
        );
        assert!(gateway.requests_for(Route::SignedUrls).is_empty());

        Ok(())
    })
}

#[test]
fn rate_limited_signed_url_request_is_retried() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::SignedUrls, 2, StatusCode::TOO_MANY_REQUESTS);
        let file = TestFile::new("retry.bin", "6 KiB")?;

        let (_, progress) = upload(&gateway, &file, "4 KiB").await?;
        progress.sanity_check_updates();

        assert_eq!(gateway.requests_for(Route::SignedUrls).len(), 3);
        assert_eq!(gateway.session_count(), 1);
        assert_eq!(gateway.object(BUCKET, "retry.bin").unwrap().data, file.data());

        Ok(())
    })
}

#[test]
fn signed_url_not_found_fails_immediately() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_next(Route::SignedUrls, StatusCode::NOT_FOUND, "Bucket not found");
        let file = TestFile::new("missing.bin", "1 KiB")?;

        let result = upload(&gateway, &file, "4 KiB").await;

        assert_matches!(
            result,
            Err(ForgeOssError::SignedUrlFetch { status, attempts: 1, ref body, .. })
                if status == StatusCode::NOT_FOUND && body == "Bucket not found"
        );
        assert!(gateway.requests_for(Route::UploadPart).is_empty());

        Ok(())
    })
}

#[test]
fn transient_part_upload_failures_are_retried() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::UploadPart, 3, StatusCode::SERVICE_UNAVAILABLE);
        let file = TestFile::new("flaky.bin", "10 KiB")?;

        upload(&gateway, &file, "4 KiB").await?;

        // Part 1 took 4 attempts, the other 2 parts one each
        assert_eq!(gateway.requests_for(Route::UploadPart).len(), 3 + 3);
        assert_eq!(gateway.object(BUCKET, "flaky.bin").unwrap().data, file.data());

        Ok(())
    })
}

#[test]
fn part_upload_gives_up_after_four_attempts() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::UploadPart, 4, StatusCode::INTERNAL_SERVER_ERROR);
        let file = TestFile::new("doomed.bin", "10 KiB")?;

        let result = upload(&gateway, &file, "4 KiB").await;

        assert_matches!(
            result,
            Err(ForgeOssError::ChunkUpload {
                part_number: 1,
                attempts: 4,
                ..
            })
        );
        assert_eq!(gateway.requests_for(Route::UploadPart).len(), 4);
        assert!(gateway.requests_for(Route::CompleteUpload).is_empty());

        Ok(())
    })
}

#[test]
fn expired_signed_url_is_refreshed() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_next(Route::UploadPart, StatusCode::FORBIDDEN, "Request has expired");
        let file = TestFile::new("expired.bin", "10 KiB")?;

        let (_, progress) = upload(&gateway, &file, "4 KiB").await?;
        progress.sanity_check_updates();

        let signed_url_requests = gateway.requests_for(Route::SignedUrls);
        assert_eq!(signed_url_requests.len(), 2);

        let refresh = &signed_url_requests[1];
        assert_eq!(refresh.query_param("firstPart").as_deref(), Some("1"));
        assert_eq!(refresh.query_param("parts").as_deref(), Some("3"));
        assert_eq!(refresh.query_param("uploadKey").as_deref(), Some("upload-1"));

        // The first attempt at part 1 plus its retry, then parts 2 and 3
        assert_eq!(part_sizes(&gateway), vec![4096, 4096, 4096, 2048]);
        assert_eq!(gateway.session_count(), 1);
        assert_eq!(gateway.object(BUCKET, "expired.bin").unwrap().data, file.data());

        Ok(())
    })
}

#[test]
fn forbidden_twice_is_fatal() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::UploadPart, 2, StatusCode::FORBIDDEN);
        let file = TestFile::new("forbidden.bin", "10 KiB")?;

        let result = upload(&gateway, &file, "4 KiB").await;

        assert_matches!(
            result,
            Err(ForgeOssError::ChunkUpload { part_number: 1, status, attempts: 1, .. })
                if status == StatusCode::FORBIDDEN
        );
        assert_eq!(gateway.requests_for(Route::UploadPart).len(), 2);
        assert!(gateway.requests_for(Route::CompleteUpload).is_empty());

        Ok(())
    })
}

#[test]
fn finalize_server_error_fails_after_three_attempts() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::CompleteUpload, 3, StatusCode::INTERNAL_SERVER_ERROR);
        let file = TestFile::new("unfinished.bin", "6 KiB")?;

        let job = UploadJobBuilder::new(test_config("4 KiB"), user_auth(&gateway), BUCKET)
            .build(file.path())
            .await?;
        let progress = TestUploadProgressCallback::new();
        let result = job.run(futures::future::pending(), progress.clone()).await;

        assert_matches!(result, Err(ForgeOssError::Finalize { attempts: 3, .. }));
        assert_eq!(gateway.requests_for(Route::CompleteUpload).len(), 3);
        assert!(gateway.object(BUCKET, "unfinished.bin").is_none());

        assert_eq!(
            progress.states().last(),
            Some(&forge_oss::UploadState::Failed)
        );
        assert!(progress.upload_completed().is_none());

        Ok(())
    })
}

#[test]
fn abort_before_start() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        let file = TestFile::new("aborted.bin", "6 KiB")?;

        let job = UploadJobBuilder::new(test_config("4 KiB"), user_auth(&gateway), BUCKET)
            .build(file.path())
            .await?;
        let result = job.run_without_progress(futures::future::ready(())).await;

        assert_matches!(
            result,
            Err(ForgeOssError::Aborted { ref object_key, .. }) if object_key == "aborted.bin"
        );
        assert!(gateway.requests().is_empty());

        Ok(())
    })
}

#[test]
fn abort_during_retry_backoff() -> Result<()> {
    test_with_logging(async move {
        let gateway = FakeGateway::start().await?;
        gateway.fail_times(Route::SignedUrls, 3, StatusCode::TOO_MANY_REQUESTS);
        let file = TestFile::new("aborted.bin", "6 KiB")?;

        // A gateway backoff far longer than the test is willing to wait
        let config = Config {
            gateway_retry: RetryPolicy::storage_gateway(),
            ..test_config("4 KiB")
        };
        let job = UploadJobBuilder::new(config, user_auth(&gateway), BUCKET)
            .build(file.path())
            .await?;

        let started = std::time::Instant::now();
        let result = job
            .run_without_progress(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_matches!(result, Err(ForgeOssError::Aborted { .. }));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(gateway.requests_for(Route::SignedUrls).len(), 1);

        Ok(())
    })
}
