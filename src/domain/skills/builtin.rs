//! Skills shipped with the core.
//!
//! Each handler is a pure function of its validated arguments and the
//! [`SkillContext`] it is given: the clock reading and the user's profile.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::{json, Value};

use super::{PropertySchema, SkillContext, SkillError, SkillFailure, SkillRegistry, SkillSchema};
use crate::domain::flow::builtin::LANGUAGES;
use crate::domain::flow::parse_timezone;

pub const GET_CURRENT_DATE: &str = "get_current_date";
pub const GET_USER_PREFERENCES: &str = "get_user_preferences";
pub const COMPLETE_ONBOARDING: &str = "complete_onboarding";
pub const BUILD_WEEKLY_PLAN: &str = "build_weekly_plan";
pub const RECORD_CHECK_IN: &str = "record_check_in";

const WEEKDAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

impl SkillRegistry {
    /// A registry preloaded with every built-in skill.
    pub fn with_builtin() -> Result<Self, SkillError> {
        let mut registry = Self::new();
        register_builtin(&mut registry)?;
        Ok(registry)
    }
}

pub fn register_builtin(registry: &mut SkillRegistry) -> Result<(), SkillError> {
    registry.register(
        GET_CURRENT_DATE,
        "Get the current date and time, optionally in a specific timezone",
        SkillSchema::object()
            .optional(
                "timezone",
                PropertySchema::string()
                    .describe("IANA name like America/New_York, UTC, or a fixed offset like -03:00"),
            )
            .optional("format", PropertySchema::string().one_of(["iso", "human"])),
        get_current_date,
    )?;

    registry.register(
        GET_USER_PREFERENCES,
        "Get the user's name, goals, timezone and language from onboarding",
        SkillSchema::object(),
        get_user_preferences,
    )?;

    registry.register(
        COMPLETE_ONBOARDING,
        "Summarize the profile collected during onboarding",
        SkillSchema::object()
            .required("name", PropertySchema::string().length(2, 100))
            .required("goals", PropertySchema::array().min_items(1))
            .required("timezone", PropertySchema::string().length(1, 64))
            .optional("language", PropertySchema::string().one_of(LANGUAGES)),
        complete_onboarding,
    )?;

    registry.register(
        BUILD_WEEKLY_PLAN,
        "Spread weekly priorities across weekdays around one protected commitment",
        SkillSchema::object()
            .required("priorities", PropertySchema::array().min_items(1))
            .required("commitment", PropertySchema::string().length(1, 280)),
        build_weekly_plan,
    )?;

    registry.register(
        RECORD_CHECK_IN,
        "Score a check-in from mood and energy",
        SkillSchema::object()
            .required("mood", PropertySchema::integer().range(1.0, 5.0))
            .required("energy", PropertySchema::integer().range(1.0, 5.0))
            .optional("highlight", PropertySchema::string())
            .optional("blocker", PropertySchema::string()),
        record_check_in,
    )?;

    Ok(())
}

/// Parses `UTC`, `+03:00`, `-0330`, `+3` or `UTC-3`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    if matches!(upper.as_str(), "UTC" | "GMT" | "Z") {
        return FixedOffset::east_opt(0);
    }
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let (sign, digits) = match rest.chars().next()? {
        '+' => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (offset_part(h)?, offset_part(m)?),
        None if digits.len() == 4 => (offset_part(digits.get(..2)?)?, offset_part(digits.get(2..)?)?),
        None => (offset_part(digits)?, 0),
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// One or two ASCII digits; signs are only allowed in front of the offset.
fn offset_part(raw: &str) -> Option<i32> {
    if raw.is_empty() || raw.len() > 2 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn string_list(value: &Value, field: &str) -> Result<Vec<String>, SkillFailure> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>())
        .filter(|items: &Vec<String>| !items.is_empty())
        .ok_or_else(|| SkillFailure::new(format!("{field} must contain text items")))
}

/// Offset in force at `at` and the name to report for it. IANA names win
/// over fixed offsets.
fn resolve_zone(requested: &str, at: &DateTime<Utc>) -> Option<(FixedOffset, String)> {
    if let Some(tz) = parse_timezone(requested) {
        let offset = at.with_timezone(&tz).offset().fix();
        return Some((offset, tz.name().to_string()));
    }
    parse_utc_offset(requested).map(|offset| (offset, requested.trim().to_string()))
}

fn get_current_date(args: &Value, ctx: &SkillContext) -> Result<Value, SkillFailure> {
    let utc: &DateTime<Utc> = ctx.now.as_datetime();
    let requested = args.get("timezone").and_then(Value::as_str).unwrap_or("UTC");
    let (offset, timezone) = match resolve_zone(requested, utc) {
        Some(zone) => zone,
        None => match FixedOffset::east_opt(0) {
            Some(zero) => (zero, "UTC".to_string()),
            None => return Err(SkillFailure::new("cannot build UTC offset")),
        },
    };
    let local = utc.with_timezone(&offset);

    let human = args.get("format").and_then(Value::as_str) == Some("human");
    let datetime = if human {
        local.format("%A, %B %d, %Y at %I:%M %p").to_string()
    } else {
        local.to_rfc3339()
    };

    Ok(json!({
        "datetime": datetime,
        "timestamp": utc.timestamp(),
        "timezone": timezone,
        "date": local.format("%Y-%m-%d").to_string(),
        "time": local.format("%H:%M:%S").to_string(),
        "day_of_week": local.format("%A").to_string(),
        "summary": format!("It is {} ({}).", local.format("%A, %B %d %H:%M"), timezone),
    }))
}

fn get_user_preferences(_args: &Value, ctx: &SkillContext) -> Result<Value, SkillFailure> {
    let profile = ctx
        .profile
        .as_ref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SkillFailure::new("no preferences recorded yet; finish onboarding first"))?;

    let mut output = profile.to_json();
    if let Some(summary) = profile.describe() {
        output["summary"] = Value::String(summary);
    }
    Ok(output)
}

fn complete_onboarding(args: &Value, _ctx: &SkillContext) -> Result<Value, SkillFailure> {
    let name = args["name"].as_str().unwrap_or_default().trim().to_string();
    let goals = string_list(&args["goals"], "goals")?;
    let timezone = args["timezone"].as_str().unwrap_or("UTC");
    let language = args.get("language").and_then(Value::as_str).unwrap_or("en");

    let summary = format!(
        "{name}, you're set up in {timezone}. We'll focus on: {}.",
        goals.join(", ")
    );
    Ok(json!({
        "display_name": name,
        "goals": goals,
        "primary_goal": goals[0],
        "goal_count": goals.len(),
        "timezone": timezone,
        "language": language,
        "summary": summary,
    }))
}

fn build_weekly_plan(args: &Value, _ctx: &SkillContext) -> Result<Value, SkillFailure> {
    let priorities = string_list(&args["priorities"], "priorities")?;
    let commitment = args["commitment"].as_str().unwrap_or_default();

    let days: Vec<Value> = WEEKDAYS
        .iter()
        .zip(priorities.iter().cycle())
        .map(|(day, focus)| json!({"day": day, "focus": focus}))
        .collect();

    let summary = format!(
        "This week: {}. Protected commitment: {}.",
        priorities.join(", "),
        commitment
    );
    Ok(json!({
        "days": days,
        "priorities": priorities,
        "commitment": commitment,
        "summary": summary,
    }))
}

fn record_check_in(args: &Value, _ctx: &SkillContext) -> Result<Value, SkillFailure> {
    let mood = args["mood"].as_i64().ok_or_else(|| SkillFailure::new("mood missing"))?;
    let energy = args["energy"].as_i64().ok_or_else(|| SkillFailure::new("energy missing"))?;
    let score = (mood + energy) as f64 / 2.0;
    let label = match score {
        s if s < 2.5 => "low",
        s if s < 4.0 => "steady",
        _ => "high",
    };
    let blocked = args
        .get("blocker")
        .and_then(Value::as_str)
        .map(|b| !matches!(b.trim().to_lowercase().as_str(), "" | "none" | "no" | "nothing"))
        .unwrap_or(false);
    let follow_up = match (label, blocked) {
        ("low", _) => "Keep today small: pick one task and rest when it's done.",
        (_, true) => "Let's break that blocker into a first step you can take today.",
        _ => "Ride the momentum: schedule your most important task first.",
    };

    Ok(json!({
        "score": score,
        "label": label,
        "blocked": blocked,
        "follow_up": follow_up,
        "summary": format!("Check-in score {score:.1} ({label}). {follow_up}"),
    }))
}
