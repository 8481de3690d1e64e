//! Tools: BMI calculator, mock weather lookup and mock project file listing.

use crate::error::{Error, Result};
use crate::server::{ConnectionHandle, DispatchTable};
use crate::types::{CallToolResult, Content, ResourceContents, Tool};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculateBmiArgs {
    /// Weight in kilograms
    pub weight_kg: f64,
    /// Height in meters
    pub height_m: f64,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FetchWeatherArgs {
    /// Name of the city
    pub city: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListFilesArgs {
    /// File pattern to match (e.g., *.js, *.md)
    pub pattern: String,
}

const WEATHER_CONDITIONS: [&str; 4] = ["Sunny", "Cloudy", "Rainy", "Partly cloudy"];

const MOCK_FILES: &[(&str, &[&str])] = &[
    (
        "*.js",
        &[
            "src/index.js",
            "src/server.js",
            "src/http-server.js",
            "src/tools/calculate-bmi.js",
            "src/tools/fetch-weather.js",
            "src/tools/list-files.js",
        ],
    ),
    ("*.md", &["README.md"]),
    ("*.json", &["package.json"]),
    ("*.sh", &["curl-examples.sh"]),
    (
        "*",
        &[
            "src/index.js",
            "src/server.js",
            "src/http-server.js",
            "README.md",
            "package.json",
            "curl-examples.sh",
        ],
    ),
];

pub fn bmi_category(bmi: f64) -> &'static str {
    if bmi < 18.5 {
        "Underweight"
    } else if bmi < 25.0 {
        "Normal weight"
    } else if bmi < 30.0 {
        "Overweight"
    } else {
        "Obese"
    }
}

pub fn mime_type_for(path: &str) -> &'static str {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("md") => "text/markdown",
        Some("sh") => "application/x-sh",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::InvalidParams(format!("{} must be a positive number", name)))
    }
}

fn non_empty<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if value.is_empty() {
        Err(Error::InvalidParams(format!("{} must not be empty", name)))
    } else {
        Ok(value)
    }
}

pub async fn calculate_bmi_handler(
    _handle: ConnectionHandle,
    args: CalculateBmiArgs,
) -> Result<CallToolResult> {
    let weight = positive("weightKg", args.weight_kg)?;
    let height = positive("heightM", args.height_m)?;
    let bmi = weight / (height * height);
    Ok(CallToolResult::text(format!(
        "BMI: {:.2} - Category: {}",
        bmi,
        bmi_category(bmi)
    )))
}

fn weather_report(city: &str) -> String {
    let mut rng = rand::rng();
    let temperature: u32 = rng.random_range(5..35);
    let conditions = WEATHER_CONDITIONS[rng.random_range(0..WEATHER_CONDITIONS.len())];
    format!("Weather in {}: {}°C, {}", city, temperature, conditions)
}

pub async fn fetch_weather_handler(
    handle: ConnectionHandle,
    args: FetchWeatherArgs,
) -> Result<CallToolResult> {
    let city = non_empty("city", &args.city)?;
    handle
        .log("info", json!(format!("Fetching weather for {}", city)))
        .await?;
    Ok(CallToolResult::text(weather_report(city)))
}

pub async fn list_files_handler(
    _handle: ConnectionHandle,
    args: ListFilesArgs,
) -> Result<CallToolResult> {
    let pattern = non_empty("pattern", &args.pattern)?;
    let files = MOCK_FILES
        .iter()
        .find(|(p, _)| *p == pattern)
        .map(|(_, files)| *files)
        .unwrap_or_default();

    let mut content = Vec::with_capacity(files.len() + 1);
    content.push(Content::text(format!(
        "Found {} files matching \"{}\":",
        files.len(),
        pattern
    )));
    for file in files {
        let file_type = match Path::new(file).extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let mut chars = ext.chars();
                chars
                    .next()
                    .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                    .unwrap_or_default()
            }
            None => "File".to_string(),
        };
        content.push(Content::Resource {
            resource: ResourceContents::text(
                format!("file:///project/{}", file),
                mime_type_for(file),
                format!("{} file: {}", file_type, file),
            ),
        });
    }

    Ok(CallToolResult {
        content,
        is_error: false,
    })
}

/// Registers every example tool.
pub fn register(table: DispatchTable) -> DispatchTable {
    let table = table
        .register_tool_typed(
            Tool::from_args::<CalculateBmiArgs>(
                "calculate-bmi",
                Some("Calculate Body Mass Index from weight and height"),
            )
            .with_title("BMI Calculator"),
            calculate_bmi_handler,
        )
        .register_tool_typed(
            Tool::from_args::<FetchWeatherArgs>(
                "fetch-weather",
                Some("Get weather information for a city"),
            )
            .with_title("Weather Fetcher"),
            fetch_weather_handler,
        )
        .register_tool_typed(
            Tool::from_args::<ListFilesArgs>(
                "list-files",
                Some("List project files matching a pattern"),
            )
            .with_title("File Lister"),
            list_files_handler,
        );
    info!(tools = ?table.tool_names(), "Registered tools");
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ConnectionHandle {
        ConnectionHandle::detached()
    }

    fn text_of(result: &CallToolResult, index: usize) -> String {
        match &result.content[index] {
            Content::Text { text } => text.clone(),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[test]
    fn test_bmi_category_thresholds() {
        assert_eq!(bmi_category(18.4), "Underweight");
        assert_eq!(bmi_category(18.5), "Normal weight");
        assert_eq!(bmi_category(24.99), "Normal weight");
        assert_eq!(bmi_category(25.0), "Overweight");
        assert_eq!(bmi_category(30.0), "Obese");
    }

    #[tokio::test]
    async fn test_calculate_bmi() {
        let result = calculate_bmi_handler(
            handle(),
            CalculateBmiArgs {
                weight_kg: 70.0,
                height_m: 1.75,
            },
        )
        .await
        .unwrap();
        assert_eq!(text_of(&result, 0), "BMI: 22.86 - Category: Normal weight");
    }

    #[tokio::test]
    async fn test_calculate_bmi_rejects_non_positive_input() {
        let err = calculate_bmi_handler(
            handle(),
            CalculateBmiArgs {
                weight_kg: 70.0,
                height_m: 0.0,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_fetch_weather_shape() {
        let result = fetch_weather_handler(
            handle(),
            FetchWeatherArgs {
                city: "Oslo".to_string(),
            },
        )
        .await
        .unwrap();
        let text = text_of(&result, 0);
        let rest = text.strip_prefix("Weather in Oslo: ").unwrap();
        let (temp, conditions) = rest.split_once("°C, ").unwrap();
        let temp: u32 = temp.parse().unwrap();
        assert!((5..35).contains(&temp));
        assert!(WEATHER_CONDITIONS.contains(&conditions));
    }

    #[tokio::test]
    async fn test_list_files_embeds_resources() {
        let result = list_files_handler(
            handle(),
            ListFilesArgs {
                pattern: "*.md".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(text_of(&result, 0), "Found 1 files matching \"*.md\":");
        assert_eq!(
            result.content[1],
            Content::Resource {
                resource: ResourceContents::text(
                    "file:///project/README.md",
                    "text/markdown",
                    "Md file: README.md"
                ),
            }
        );
    }

    #[tokio::test]
    async fn test_list_files_unknown_pattern() {
        let result = list_files_handler(
            handle(),
            ListFilesArgs {
                pattern: "*.rs".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(text_of(&result, 0), "Found 0 files matching \"*.rs\":");
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for("src/index.js"), "text/javascript");
        assert_eq!(mime_type_for("package.json"), "application/json");
        assert_eq!(mime_type_for("notes.txt"), "text/plain");
        assert_eq!(mime_type_for("Makefile"), "application/octet-stream");
    }

    #[test]
    fn test_register_adds_all_tools() {
        let table = register(DispatchTable::new("t"));
        assert_eq!(
            table.tool_names(),
            vec!["calculate-bmi", "fetch-weather", "list-files"]
        );
    }
}
