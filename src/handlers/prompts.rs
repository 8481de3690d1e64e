//! Prompts: guided workflows that point the client at the tools and
//! resources this server exposes.

use crate::error::{Error, Result};
use crate::server::{ConnectionHandle, DispatchTable, PromptArguments};
use crate::types::{GetPromptResult, Prompt, PromptArgument, PromptMessage};

const FOCUS_AREAS: &[&str] = &["overview", "structure", "config", "all"];
const ACTIVITIES: &[&str] = &["travel", "outdoor", "fitness", "general"];
const REVIEW_SCOPES: &[&str] = &["full", "changes", "specific"];
const REVIEW_FOCUSES: &[&str] = &["quality", "security", "performance", "maintainability", "all"];
const ROLES: &[&str] = &["developer", "user", "admin", "reviewer"];
const EXPERIENCE_LEVELS: &[&str] = &["beginner", "intermediate", "expert"];

fn required<'a>(args: &'a PromptArguments, name: &str) -> Result<&'a str> {
    args.get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidParams(format!("Missing required argument '{}'", name)))
}

fn optional<'a>(args: &'a PromptArguments, name: &str) -> Option<&'a str> {
    args.get(name).map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// A required argument restricted to a fixed set of values.
fn choice<'a>(args: &'a PromptArguments, name: &str, allowed: &[&str]) -> Result<&'a str> {
    let value = required(args, name)?;
    if allowed.contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidParams(format!(
            "Invalid value '{}' for argument '{}', expected one of: {}",
            value,
            name,
            allowed.join(", ")
        )))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn single_message(description: &str, text: String) -> GetPromptResult {
    GetPromptResult {
        description: Some(description.to_string()),
        messages: vec![PromptMessage::user_text(text)],
    }
}

pub async fn health_assessment_handler(
    _handle: ConnectionHandle,
    args: PromptArguments,
) -> Result<GetPromptResult> {
    let parse = |name: &str| -> Result<f64> {
        let raw = required(&args, name)?;
        raw.trim()
            .parse::<f64>()
            .map_err(|_| Error::InvalidParams(format!("Argument '{}' must be a number, got '{}'", name, raw)))
    };
    let weight = parse("weight")?;
    let height = parse("height")?;
    let city = required(&args, "city")?;
    if city.trim().is_empty() {
        return Err(Error::InvalidParams("Argument 'city' must not be empty".to_string()));
    }
    let goals = match optional(&args, "goals") {
        Some(goals) => format!("Your stated goals: {}", goals),
        None => "No specific goals provided - general health maintenance recommended".to_string(),
    };

    let text = format!(
        "## Personal Health Assessment\n\n\
         ### BMI Analysis\n\
         Based on your weight of {weight}kg and height of {height}m:\n\n\
         ### Recommended Actions:\n\
         - **BMI Calculation**: Use the calculate-bmi tool with weightKg: {weight}, heightM: {height}\n\
         - **Weather Check**: Use the fetch-weather tool with city: \"{city}\"\n\
         - **Activity Planning**: Based on BMI category and weather conditions\n\n\
         ### Health Goals\n{goals}\n\n\
         ### Follow-up Recommendations:\n\
         - Monitor BMI regularly\n\
         - Adjust activities based on weather conditions\n\
         - Consider outdoor activities when weather permits\n\n\
         **Tools to use:**\n\
         1. `calculate-bmi` - Get your BMI and health category\n\
         2. `fetch-weather` - Check weather conditions in {city}\n\
         3. `config://app` - Access server configuration for additional health features\n"
    );
    Ok(single_message(
        "Comprehensive health assessment with BMI calculation and activity recommendations",
        text,
    ))
}

pub async fn project_analysis_handler(
    _handle: ConnectionHandle,
    args: PromptArguments,
) -> Result<GetPromptResult> {
    let focus = choice(&args, "focus", FOCUS_AREAS)?;
    let file_types = optional(&args, "fileTypes");
    let wants = |area: &str| focus == area || focus == "all";

    let mut text = format!(
        "## Project Analysis Guide\n\n### Analysis Focus: {}\n",
        focus.to_uppercase()
    );
    if wants("overview") {
        text.push_str(
            "\n### Project Overview\n\
             - Use `list-files` with pattern \"*\" to see all files\n\
             - Access `config://app` for application settings\n\
             - Access `info://server` for server information\n",
        );
    }
    if wants("structure") {
        text.push_str("\n### Code Structure Analysis\n");
        match file_types {
            Some(types) => {
                let patterns: Vec<String> = types
                    .split(',')
                    .map(|t| format!("\"*.{}\"", t.trim()))
                    .collect();
                text.push_str(&format!(
                    "- Focus on specified types: {}\n- Use `list-files` with patterns: {}\n",
                    types,
                    patterns.join(", ")
                ));
            }
            None => text.push_str(
                "- JavaScript files: `list-files` with pattern \"*.js\"\n\
                 - Configuration files: `list-files` with pattern \"*.json\"\n\
                 - Documentation: `list-files` with pattern \"*.md\"\n\
                 - Scripts: `list-files` with pattern \"*.sh\"\n",
            ),
        }
    }
    if wants("config") {
        text.push_str(
            "\n### Configuration Deep Dive\n\
             - Access `config://app` for application configuration\n\
             - Access `info://server` for runtime information\n\
             - List configuration files: `list-files` with \"*.json\"\n",
        );
    }
    text.push_str("\n**Start with:** `list-files` tool using pattern \"*\" to get the full project overview.\n");

    Ok(single_message(
        "Comprehensive project analysis and codebase exploration",
        text,
    ))
}

pub async fn weather_planning_handler(
    _handle: ConnectionHandle,
    args: PromptArguments,
) -> Result<GetPromptResult> {
    let cities: Vec<&str> = required(&args, "cities")?
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let Some(first_city) = cities.first() else {
        return Err(Error::InvalidParams(
            "Argument 'cities' must name at least one city".to_string(),
        ));
    };
    let activity = choice(&args, "activity", ACTIVITIES)?;
    let duration = optional(&args, "duration").unwrap_or("current conditions");

    let mut text = format!(
        "## Weather Planning Assistant\n\n\
         **Cities to check:** {}\n\
         **Activity type:** {}\n\
         **Planning duration:** {}\n\n\
         ### Weather Check Sequence\n",
        cities.join(", "),
        activity.to_uppercase(),
        duration
    );
    for (index, city) in cities.iter().enumerate() {
        text.push_str(&format!(
            "{}. **{}**\n   - Use `fetch-weather` tool with city: \"{}\"\n   - Evaluate suitability for {} activities\n",
            index + 1,
            city,
            city,
            activity
        ));
    }
    let considerations = match activity {
        "travel" => "Temperature ranges for packing, precipitation for itinerary planning, comparison between destinations",
        "outdoor" => "Temperature comfort, precipitation and wind, visibility and safety, equipment needs",
        "fitness" => "Outdoor vs indoor workouts, heat and cold precautions, hydration and gear",
        _ => "Commute impacts, clothing and preparation, event and errand timing",
    };
    text.push_str(&format!(
        "\n### {} Planning\n{}\n\n**Next Step:** Start by checking weather for {} using the `fetch-weather` tool, then proceed through the remaining cities for comparison.\n",
        capitalize(activity),
        considerations,
        first_city
    ));

    Ok(single_message(
        "Weather-based activity and travel planning assistant",
        text,
    ))
}

pub async fn code_review_handler(
    _handle: ConnectionHandle,
    args: PromptArguments,
) -> Result<GetPromptResult> {
    let scope = choice(&args, "scope", REVIEW_SCOPES)?;
    let focus = choice(&args, "focus", REVIEW_FOCUSES)?;
    let file_pattern = optional(&args, "filePattern");

    let mut text = format!(
        "## Code Review Guide\n\n**Scope:** {}\n**Focus:** {}\n",
        scope.to_uppercase(),
        focus.to_uppercase()
    );
    if let Some(pattern) = file_pattern {
        text.push_str(&format!("**File Pattern:** {}\n", pattern));
    }

    text.push_str("\n### File Analysis\n");
    match (scope, file_pattern) {
        ("full", _) => text.push_str(
            "- Review all JavaScript files: `list-files` with \"*.js\"\n\
             - Check configuration files: `list-files` with \"*.json\"\n\
             - Examine documentation: `list-files` with \"*.md\"\n",
        ),
        ("specific", Some(pattern)) => text.push_str(&format!(
            "- Focus on specific pattern: `list-files` with \"{}\"\n- Analyze related configuration files\n",
            pattern
        )),
        _ => text.push_str(
            "- Identify changed files using file listing tools\n\
             - Map dependencies and related components\n",
        ),
    }

    let areas: &[(&str, &str)] = &[
        ("quality", "Naming, structure, error handling and readability"),
        ("security", "Secrets handling, input validation and dependency hygiene"),
        ("performance", "Resource usage, session management and cleanup"),
        ("maintainability", "Documentation, test coverage and build workflow"),
    ];
    text.push_str("\n### Review Focus Areas\n");
    for (area, checklist) in areas.iter().filter(|(area, _)| focus == "all" || focus == *area) {
        text.push_str(&format!("- **{}**: {}\n", capitalize(area), checklist));
    }
    text.push_str(
        "\n**Begin your review with:** `list-files` with pattern \"*\", then `config://app` and `info://server`.\n",
    );

    Ok(single_message(
        "Systematic code review and quality assessment guide",
        text,
    ))
}

pub async fn onboarding_handler(
    _handle: ConnectionHandle,
    args: PromptArguments,
) -> Result<GetPromptResult> {
    let role = choice(&args, "role", ROLES)?;
    let experience = choice(&args, "experience", EXPERIENCE_LEVELS)?;
    let focus = optional(&args, "focus");

    let mut text = format!(
        "## Welcome! Onboarding Guide\n\n**Role:** {}\n**Experience Level:** {}\n",
        role.to_uppercase(),
        experience.to_uppercase()
    );
    if let Some(focus) = focus {
        text.push_str(&format!("**Focus Areas:** {}\n", focus));
    }

    let path = match role {
        "developer" => "Explore the project with `list-files` \"*\", read `info://server`, then study the tool and resource handlers",
        "user" => "Read `info://server`, try the BMI calculator and weather tools, then combine tools with the prompts",
        "admin" => "Review `config://app`, the health endpoint, session management and cleanup",
        _ => "Learn the review standards, then practise with `list-files` and the code-review prompt",
    };
    let pace = match experience {
        "beginner" => "Take one component at a time and start with single-tool requests.",
        "intermediate" => "Focus on architecture patterns, protocol handling and edge cases.",
        _ => "Evaluate design trade-offs, security posture and scalability.",
    };
    text.push_str(&format!(
        "\n### Onboarding Path for {}\n{}\n\n### Learning Pace\n{}\n",
        capitalize(role),
        path,
        pace
    ));
    text.push_str(
        "\n### Essential Tools\n\
         1. `list-files` - Project exploration and file discovery\n\
         2. `calculate-bmi` - Parameters: weightKg (number), heightM (number)\n\
         3. `fetch-weather` - Parameter: city (string)\n\n\
         ### Core Resources\n\
         - `config://app`, `info://server`\n\
         - `users://{id}/profile`, `github://repos/{owner}/{repo}`\n\n\
         **Ready to begin? Start by exploring the project structure with `list-files` pattern \"*\"**\n",
    );

    Ok(single_message(
        "Comprehensive onboarding guide for new team members and users",
        text,
    ))
}

fn prompt(name: &str, description: &str, arguments: Vec<PromptArgument>) -> Prompt {
    Prompt {
        name: name.to_string(),
        description: Some(description.to_string()),
        arguments: Some(arguments),
    }
}

/// Registers every example prompt.
pub fn register(table: DispatchTable) -> DispatchTable {
    table
        .register_prompt(
            prompt(
                "health-assessment",
                "Comprehensive health assessment with BMI calculation and activity recommendations",
                vec![
                    PromptArgument::required("weight", "Weight in kilograms"),
                    PromptArgument::required("height", "Height in meters"),
                    PromptArgument::required("city", "City for weather-based activity recommendations"),
                    PromptArgument::optional("goals", "Health or fitness goals (optional)"),
                ],
            ),
            health_assessment_handler,
        )
        .register_prompt(
            prompt(
                "project-analysis",
                "Comprehensive project analysis and codebase exploration",
                vec![
                    PromptArgument::required("focus", "Analysis focus area: overview, structure, config or all"),
                    PromptArgument::optional("fileTypes", "Specific file types to analyze (e.g., 'js,json,md')"),
                ],
            ),
            project_analysis_handler,
        )
        .register_prompt(
            prompt(
                "weather-planning",
                "Weather-based activity and travel planning assistant",
                vec![
                    PromptArgument::required("cities", "Comma-separated list of cities to check"),
                    PromptArgument::required("activity", "Type of activity planning: travel, outdoor, fitness or general"),
                    PromptArgument::optional("duration", "Duration of planning (e.g., 'weekend', 'week', 'month')"),
                ],
            ),
            weather_planning_handler,
        )
        .register_prompt(
            prompt(
                "code-review",
                "Systematic code review and quality assessment guide",
                vec![
                    PromptArgument::required("scope", "Review scope: full, changes or specific"),
                    PromptArgument::required(
                        "focus",
                        "Review focus area: quality, security, performance, maintainability or all",
                    ),
                    PromptArgument::optional("filePattern", "Specific file pattern to review (e.g., '*.js')"),
                ],
            ),
            code_review_handler,
        )
        .register_prompt(
            prompt(
                "onboarding",
                "Comprehensive onboarding guide for new team members and users",
                vec![
                    PromptArgument::required("role", "Role being onboarded: developer, user, admin or reviewer"),
                    PromptArgument::required("experience", "Experience level: beginner, intermediate or expert"),
                    PromptArgument::optional("focus", "Specific areas of interest or responsibility"),
                ],
            ),
            onboarding_handler,
        )
}
