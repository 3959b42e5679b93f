use std::sync::OnceLock;

use regex::Regex;

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// Expand `${VAR_NAME}` references; unknown variables are left as written.
pub(crate) fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    env_var_pattern()
        .replace_all(value, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Reject URLs the transports cannot use.
pub fn validate_url(label: &str, url: &str, schemes: &[&str]) -> Result<(), String> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| format!("{} '{}' is missing a scheme", label, url))?;
    if schemes.contains(&scheme.as_str()) {
        Ok(())
    } else {
        Err(format!(
            "{} '{}' must use one of: {}",
            label,
            url,
            schemes.join(", ")
        ))
    }
}
