//! Validation of untrusted cache entries.
//!
//! Payloads are checked as raw JSON before anything is deserialized into the
//! typed model, so that each rejection names the exact offending field
//! (`result.days[3].languages.rust`). Validation stops at the first violation.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::language::Language;
use crate::repo_url::normalize;
use crate::stats::{SharedCacheEntry, CACHE_ENTRY_VERSION};
use crate::Result;

type Check = std::result::Result<(), ValidationError>;

/// Whether `id` is a full lowercase hex commit id.
pub fn is_commit_id(id: &str) -> bool {
    id.len() == 40 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn object<'a>(value: &'a Value, field: &str) -> std::result::Result<&'a Map<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::new(field, "must be an object"))
}

fn get<'a>(map: &'a Map<String, Value>, parent: &str, key: &str) -> std::result::Result<&'a Value, ValidationError> {
    map.get(key)
        .ok_or_else(|| ValidationError::new(join(parent, key), "missing"))
}

fn string<'a>(value: &'a Value, field: &str) -> std::result::Result<&'a str, ValidationError> {
    value
        .as_str()
        .ok_or_else(|| ValidationError::new(field, "must be a string"))
}

fn count(value: &Value, field: &str) -> std::result::Result<u64, ValidationError> {
    value
        .as_u64()
        .ok_or_else(|| ValidationError::new(field, "must be a non-negative integer"))
}

fn timestamp(value: &Value, field: &str) -> Check {
    DateTime::parse_from_rfc3339(string(value, field)?)
        .map(|_| ())
        .map_err(|_| ValidationError::new(field, "must be an RFC 3339 timestamp"))
}

fn language(id: &str, field: &str) -> Check {
    match Language::from_id(id) {
        Some(_) => Ok(()),
        None => Err(ValidationError::new(field, format!("unknown language {:?}", id))),
    }
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Check a candidate entry against every structural and semantic rule.
pub fn validate_entry(value: &Value, max_days: usize) -> Check {
    let root = object(value, "entry")?;

    let version = get(root, "", "version")?;
    if version.as_u64() != Some(u64::from(CACHE_ENTRY_VERSION)) {
        return Err(ValidationError::new(
            "version",
            format!("unsupported version {}", version),
        ));
    }

    let repo_url = normalize(string(get(root, "", "repoUrl")?, "repoUrl")?)?;

    let head = string(get(root, "", "headCommit")?, "headCommit")?;
    if !is_commit_id(head) {
        return Err(ValidationError::new(
            "headCommit",
            "must be 40 lowercase hexadecimal digits",
        ));
    }
    timestamp(get(root, "", "updatedAt")?, "updatedAt")?;

    let result_value = get(root, "", "result")?;
    check_result(result_value, "result", max_days)?;
    let result = object(result_value, "result")?;
    let result_url = string(get(result, "result", "repoUrl")?, "result.repoUrl")?;
    if normalize(result_url).map_err(|e| ValidationError::new("result.repoUrl", e.reason))? != repo_url {
        return Err(ValidationError::new("result.repoUrl", "does not match repoUrl"));
    }
    if string(get(result, "result", "headCommit")?, "result.headCommit")? != head {
        return Err(ValidationError::new("result.headCommit", "does not match headCommit"));
    }

    Ok(())
}

/// Check a bare analysis result, as written by `analyze --output`.
///
/// The repository URL is only required to be a string: results of local
/// repositories without a remote carry an empty one.
pub fn validate_result(value: &Value, max_days: usize) -> Check {
    check_result(value, "", max_days)
}

fn check_result(value: &Value, prefix: &str, max_days: usize) -> Check {
    let field = |key: &str| join(prefix, key);
    let result = object(value, if prefix.is_empty() { "result" } else { prefix })?;

    string(get(result, prefix, "repoUrl")?, &field("repoUrl"))?;
    if !is_commit_id(string(get(result, prefix, "headCommit")?, &field("headCommit"))?) {
        return Err(ValidationError::new(
            field("headCommit"),
            "must be 40 lowercase hexadecimal digits",
        ));
    }
    string(get(result, prefix, "defaultBranch")?, &field("defaultBranch"))?;
    timestamp(get(result, prefix, "analyzedAt")?, &field("analyzedAt"))?;

    let detected = get(result, prefix, "detectedLanguages")?
        .as_array()
        .ok_or_else(|| ValidationError::new(field("detectedLanguages"), "must be an array"))?;
    for (i, id) in detected.iter().enumerate() {
        let lang_field = field(&format!("detectedLanguages[{}]", i));
        language(string(id, &lang_field)?, &lang_field)?;
    }

    let days = get(result, prefix, "days")?
        .as_array()
        .ok_or_else(|| ValidationError::new(field("days"), "must be an array"))?;
    if days.len() > max_days {
        return Err(ValidationError::new(
            field("days"),
            format!("too many days ({} > {})", days.len(), max_days),
        ));
    }

    let mut previous: Option<NaiveDate> = None;
    for (i, day) in days.iter().enumerate() {
        let day_field = field(&format!("days[{}]", i));
        let date = validate_day(day, &day_field)?;
        if previous.is_some_and(|p| p >= date) {
            return Err(ValidationError::new(
                format!("{}.date", day_field),
                "days must be strictly ascending",
            ));
        }
        previous = Some(date);
    }

    Ok(())
}

fn validate_day(day: &Value, field: &str) -> std::result::Result<NaiveDate, ValidationError> {
    let map = object(day, field)?;

    let date_field = join(field, "date");
    let date = NaiveDate::parse_from_str(string(get(map, field, "date")?, &date_field)?, "%Y-%m-%d")
        .map_err(|_| ValidationError::new(&date_field, "must be a YYYY-MM-DD date"))?;

    count(get(map, field, "total")?, &join(field, "total"))?;

    let languages_field = join(field, "languages");
    for (id, counts) in object(get(map, field, "languages")?, &languages_field)? {
        let lang_field = join(&languages_field, id);
        language(id, &lang_field)?;
        let counts_map = object(counts, &lang_field)?;

        let total = count(get(counts_map, &lang_field, "total")?, &join(&lang_field, "total"))?;
        let prod = counts_map
            .get("prod")
            .map(|v| count(v, &join(&lang_field, "prod")))
            .transpose()?;
        let test = counts_map
            .get("test")
            .map(|v| count(v, &join(&lang_field, "test")))
            .transpose()?;
        if let (Some(prod), Some(test)) = (prod, test) {
            if prod.checked_add(test) != Some(total) {
                return Err(ValidationError::new(
                    lang_field,
                    format!("prod + test ({} + {}) != total ({})", prod, test, total),
                ));
            }
        }
    }

    let comments_field = join(field, "comments");
    let comments = get(map, field, "comments")?
        .as_array()
        .ok_or_else(|| ValidationError::new(&comments_field, "must be an array"))?;
    for (i, comment) in comments.iter().enumerate() {
        string(comment, &format!("{}[{}]", comments_field, i))?;
    }

    Ok(date)
}

/// Validate an untyped payload and convert it into an entry.
pub fn parse_entry(value: Value, max_days: usize) -> Result<SharedCacheEntry> {
    validate_entry(&value, max_days)?;
    Ok(serde_json::from_value(value)?)
}
