//! Input filters shared by the page flows

use thiserror::Error;

const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("Email address is empty")]
    Empty,

    #[error("Email address contains illegal characters: {0}")]
    IllegalCharacters(String),

    #[error("Email address is not valid")]
    Malformed,
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Normalize and check an email address.
///
/// Returns the trimmed, lowercased address. The result is safe to use as a
/// file name: no path separators and never a leading dot.
pub fn normalize_email(raw: &str) -> Result<String, EmailError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(EmailError::Empty);
    }

    let mut illegal: Vec<char> = Vec::new();
    for c in email.chars() {
        if !(is_local_char(c) || c == '@') && !illegal.contains(&c) {
            illegal.push(c);
        }
    }
    if !illegal.is_empty() {
        let listed = illegal
            .iter()
            .map(|c| format!("'{}'", c.escape_default()))
            .collect::<Vec<_>>()
            .join(" ");
        return Err(EmailError::IllegalCharacters(listed));
    }

    if email.len() > MAX_EMAIL_LEN {
        return Err(EmailError::Malformed);
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(EmailError::Malformed);
    };
    if local.is_empty()
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
        || !local.chars().all(is_local_char)
    {
        return Err(EmailError::Malformed);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2
        || labels
            .iter()
            .any(|l| l.is_empty() || l.starts_with('-') || l.ends_with('-'))
        || !domain.chars().all(is_domain_char)
    {
        return Err(EmailError::Malformed);
    }

    Ok(email)
}

/// Escape the five HTML-significant characters
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProblemNameError {
    #[error("Problem name is empty")]
    Empty,

    #[error("Problem name may only contain letters, digits, '_' and '-'")]
    IllegalCharacters,

    #[error("Problem name must contain at least one letter")]
    NoLetter,
}

/// Problem names match `[A-Za-z0-9_-]+` and contain at least one letter
pub fn check_problem_name(raw: &str) -> Result<&str, ProblemNameError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ProblemNameError::Empty);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ProblemNameError::IllegalCharacters);
    }
    if !name.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(ProblemNameError::NoLetter);
    }
    Ok(name)
}
