//! Resources: static application documents plus templated user and
//! repository lookups backed by mock data.

use crate::error::Result;
use crate::server::{ConnectionHandle, DispatchTable, ResourceRequest};
use crate::types::{ReadResourceResult, Resource, ResourceContents, ResourceTemplate};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde_json::json;

const APP_NAME: &str = "MCP Server Example";
const JSON_MIME: &str = "application/json";
const TEXT_MIME: &str = "text/plain";

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn json_contents(uri: String, value: &serde_json::Value) -> Result<ReadResourceResult> {
    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(
            uri,
            JSON_MIME,
            serde_json::to_string_pretty(value)?,
        )],
    })
}

pub async fn app_config_handler(
    _handle: ConnectionHandle,
    request: ResourceRequest,
) -> Result<ReadResourceResult> {
    json_contents(
        request.uri,
        &json!({
            "appName": APP_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "features": ["BMI Calculator", "Weather Fetcher", "File Lister"],
            "lastUpdated": now_iso(),
        }),
    )
}

pub async fn server_info_handler(
    _handle: ConnectionHandle,
    request: ResourceRequest,
) -> Result<ReadResourceResult> {
    let text = format!(
        "{}\nVersion: {}\nRuntime: Rust (tokio)\nProtocol: Model Context Protocol\nTools: 3 available\nResources: Multiple static and dynamic resources\n",
        APP_NAME,
        env!("CARGO_PKG_VERSION"),
    );
    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(request.uri, TEXT_MIME, text)],
    })
}

pub async fn user_profile_handler(
    _handle: ConnectionHandle,
    request: ResourceRequest,
) -> Result<ReadResourceResult> {
    let user_id = request.var("userId")?.to_string();
    json_contents(
        request.uri,
        &json!({
            "id": user_id,
            "name": format!("User {}", user_id),
            "email": format!("user{}@example.com", user_id),
            "createdAt": now_iso(),
            "preferences": {
                "theme": "dark",
                "notifications": true,
            },
        }),
    )
}

pub async fn repository_handler(
    _handle: ConnectionHandle,
    request: ResourceRequest,
) -> Result<ReadResourceResult> {
    let owner = request.var("owner")?.to_string();
    let repo = request.var("repo")?.to_string();
    let (stars, forks) = {
        let mut rng = rand::rng();
        (rng.random_range(0..10_000u32), rng.random_range(0..1_000u32))
    };
    json_contents(
        request.uri,
        &json!({
            "fullName": format!("{}/{}", owner, repo),
            "owner": { "login": owner },
            "name": repo,
            "description": format!("Repository {} owned by {}", repo, owner),
            "language": "JavaScript",
            "stars": stars,
            "forks": forks,
            "lastUpdated": now_iso(),
        }),
    )
}

/// Registers the static resources and the resource templates.
pub fn register(table: DispatchTable) -> DispatchTable {
    table
        .register_resource(
            Resource {
                uri: "config://app".to_string(),
                name: "config".to_string(),
                title: Some("Application Config".to_string()),
                description: Some("Application configuration data".to_string()),
                mime_type: Some(JSON_MIME.to_string()),
            },
            app_config_handler,
        )
        .register_resource(
            Resource {
                uri: "info://server".to_string(),
                name: "server-info".to_string(),
                title: Some("Server Information".to_string()),
                description: Some("Information about the MCP server".to_string()),
                mime_type: Some(TEXT_MIME.to_string()),
            },
            server_info_handler,
        )
        .register_resource_template(
            ResourceTemplate {
                uri_template: "users://{userId}/profile".to_string(),
                name: "user-profile".to_string(),
                title: Some("User Profile".to_string()),
                description: Some("User profile information by ID".to_string()),
                mime_type: Some(JSON_MIME.to_string()),
            },
            user_profile_handler,
        )
        .register_resource_template(
            ResourceTemplate {
                uri_template: "github://repos/{owner}/{repo}".to_string(),
                name: "repository".to_string(),
                title: Some("GitHub Repository".to_string()),
                description: Some("Repository information from GitHub".to_string()),
                mime_type: Some(JSON_MIME.to_string()),
            },
            repository_handler,
        )
}
