//! Secrets Manager integration tests using aws-sdk-secretsmanager
//!
//! These tests verify the Secrets Manager implementation against the official AWS SDK.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::{
    config::{Credentials, Region},
    operation::get_secret_value::GetSecretValueError,
    Client,
};
use axum::{routing::post, Router};
use serde_json::json;
use tokio::net::TcpListener;

use secretstack_secretsmanager::{handle_request, SecretsManagerState};

/// Start a test server and return its endpoint
async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = format!("http://{}", addr);

    let state = Arc::new(SecretsManagerState::new());
    let router = Router::new()
        .route("/", post(handle_request))
        .with_state(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (endpoint, handle)
}

/// Create a Secrets Manager client pointing to our test server
async fn create_test_client(endpoint: &str, region: &'static str) -> Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .endpoint_url(endpoint)
        .credentials_provider(Credentials::new("test", "test", None, None, "test"))
        .region(Region::new(region))
        .load()
        .await;

    Client::new(&config)
}

fn short_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[tokio::test]
async fn test_create_and_update_secret() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;
    let secret_name = format!("s-{}", short_uid());

    let created = client
        .create_secret()
        .name(&secret_name)
        .secret_string("my_secret")
        .description("testing creation of secrets")
        .send()
        .await
        .unwrap();
    let secret_arn = created.arn().unwrap().to_string();
    assert_eq!(secret_arn.rsplit_once('-').unwrap().1.len(), 6);

    // By name, full ARN, and ARN without the random suffix (with and without hyphen)
    for secret_id in [
        secret_name.as_str(),
        secret_arn.as_str(),
        &secret_arn[..secret_arn.len() - 6],
        &secret_arn[..secret_arn.len() - 7],
    ] {
        let rs = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .unwrap();
        assert_eq!(rs.name(), Some(secret_name.as_str()), "lookup by {secret_id}");
        assert_eq!(rs.secret_string(), Some("my_secret"));
        assert_eq!(rs.arn(), Some(secret_arn.as_str()));
        assert!(rs.created_date().is_some());
    }

    client
        .put_secret_value()
        .secret_id(&secret_name)
        .secret_string("new_secret")
        .send()
        .await
        .unwrap();

    let rs = client
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    assert_eq!(rs.name(), Some(secret_name.as_str()));
    assert_eq!(rs.secret_string(), Some("new_secret"));
    assert_eq!(rs.arn(), Some(secret_arn.as_str()));

    // Update secret by ARN
    let rs = client
        .update_secret()
        .secret_id(&secret_arn)
        .kms_key_id("test123")
        .description("d1")
        .send()
        .await
        .unwrap();
    assert_eq!(rs.arn(), Some(secret_arn.as_str()));

    let described = client
        .describe_secret()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    assert_eq!(described.kms_key_id(), Some("test123"));
    assert_eq!(described.description(), Some("d1"));

    client
        .delete_secret()
        .secret_id(&secret_name)
        .force_delete_without_recovery(true)
        .send()
        .await
        .unwrap();

    let err = client
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        err.into_service_error(),
        GetSecretValueError::ResourceNotFoundException(_)
    ));
}

#[tokio::test]
async fn test_call_list_secrets_multiple_times() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;
    let secret_name = format!("s-{}", short_uid());

    client
        .create_secret()
        .name(&secret_name)
        .secret_string("my_secret")
        .description("testing creation of secrets")
        .send()
        .await
        .unwrap();

    for _ in 0..3 {
        let rs = client.list_secrets().send().await.unwrap();
        let matching = rs
            .secret_list()
            .iter()
            .filter(|s| s.name() == Some(secret_name.as_str()))
            .count();
        assert_eq!(matching, 1);
    }
}

#[tokio::test]
async fn test_create_multi_secrets() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;

    let secret_names: Vec<String> = (0..3).map(|i| format!("multi-{i}-{}", short_uid())).collect();
    let mut arns = Vec::new();
    for secret_name in &secret_names {
        let rs = client
            .create_secret()
            .name(secret_name)
            .secret_string(format!("my_secret_{secret_name}"))
            .description("testing creation of secrets")
            .send()
            .await
            .unwrap();
        arns.push(rs.arn().unwrap().to_string());
    }

    let rs = client.list_secrets().send().await.unwrap();
    let listed: HashMap<&str, &str> = rs
        .secret_list()
        .iter()
        .filter_map(|s| Some((s.name()?, s.arn()?)))
        .filter(|(name, _)| secret_names.iter().any(|n| n == name))
        .collect();

    assert_eq!(listed.len(), secret_names.len());
    let listed_arns: HashSet<&str> = listed.values().copied().collect();
    for arn in &arns {
        assert!(listed_arns.contains(arn.as_str()));
    }
}

#[tokio::test]
async fn test_get_random_exclude_characters_and_symbols() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;

    let rs = client
        .get_random_password()
        .password_length(120)
        .exclude_characters("xyzDje@?!.")
        .send()
        .await
        .unwrap();

    let password = rs.random_password().unwrap();
    assert_eq!(password.chars().count(), 120);
    assert!(password.chars().all(|c| !"xyzDje@?!.".contains(c)));
}

#[tokio::test]
async fn test_resource_policy() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;
    let secret_name = format!("s-{}", short_uid());

    client
        .create_secret()
        .name(&secret_name)
        .secret_string("my_secret")
        .send()
        .await
        .unwrap();

    let policy = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"AWS": "arn:aws:iam::000000000000:root"},
            "Action": "secretsmanager:GetSecretValue",
            "Resource": "*"
        }]
    });

    client
        .put_resource_policy()
        .secret_id(&secret_name)
        .resource_policy(policy.to_string())
        .send()
        .await
        .unwrap();

    let rs = client
        .get_resource_policy()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    let stored: serde_json::Value = serde_json::from_str(rs.resource_policy().unwrap()).unwrap();
    assert_eq!(stored["Version"], policy["Version"]);
    assert_eq!(stored["Statement"], policy["Statement"]);

    client
        .delete_resource_policy()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();

    let rs = client
        .get_resource_policy()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    assert!(rs.resource_policy().is_none());
}

#[tokio::test]
async fn test_secrets_are_regional() {
    let (endpoint, _handle) = start_test_server().await;
    let east = create_test_client(&endpoint, "us-east-1").await;
    let west = create_test_client(&endpoint, "eu-west-1").await;
    let secret_name = format!("s-{}", short_uid());

    let created = west
        .create_secret()
        .name(&secret_name)
        .secret_string("v")
        .send()
        .await
        .unwrap();
    assert!(created.arn().unwrap().contains(":eu-west-1:"));

    let err = east
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        err.into_service_error(),
        GetSecretValueError::ResourceNotFoundException(_)
    ));

    let rs = west
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    assert_eq!(rs.secret_string(), Some("v"));
}

#[tokio::test]
async fn test_scheduled_deletion_and_restore() {
    let (endpoint, _handle) = start_test_server().await;
    let client = create_test_client(&endpoint, "us-east-1").await;
    let secret_name = format!("s-{}", short_uid());

    client
        .create_secret()
        .name(&secret_name)
        .secret_string("v")
        .send()
        .await
        .unwrap();

    let rs = client
        .delete_secret()
        .secret_id(&secret_name)
        .recovery_window_in_days(7)
        .send()
        .await
        .unwrap();
    assert!(rs.deletion_date().is_some());

    let listed = client.list_secrets().send().await.unwrap();
    assert!(listed
        .secret_list()
        .iter()
        .all(|s| s.name() != Some(secret_name.as_str())));

    let err = client
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        err.into_service_error(),
        GetSecretValueError::InvalidRequestException(_)
    ));

    client
        .restore_secret()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();

    let rs = client
        .get_secret_value()
        .secret_id(&secret_name)
        .send()
        .await
        .unwrap();
    assert_eq!(rs.secret_string(), Some("v"));
}
