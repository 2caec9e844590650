/// Decides whether a piece of text can be a learner identity.
///
/// Used both when reading roster cells and when filtering decoded payloads.
pub trait IdentityValidator: Send + Sync {
    fn is_valid(&self, candidate: &str) -> bool;
}

/// Structural checks plus a case-insensitive list of boilerplate fragments
#[derive(Debug, Clone, Default)]
pub struct StandardIdentityValidator {
    excluded: Vec<String>,
}

impl StandardIdentityValidator {
    pub fn new<I, S>(excluded_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: excluded_keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl IdentityValidator for StandardIdentityValidator {
    fn is_valid(&self, candidate: &str) -> bool {
        let name = candidate.trim();
        if name.chars().count() < 2 {
            return false;
        }

        let upper = name.to_uppercase();
        if self.excluded.iter().any(|k| upper.contains(k.as_str())) {
            return false;
        }

        if !name.chars().any(char::is_alphabetic) {
            return false;
        }

        if is_numeric_only(name) || is_date_like(name) {
            return false;
        }

        name.chars().any(char::is_alphanumeric)
    }
}

/// Digits once '.', ',' and spaces are removed
fn is_numeric_only(text: &str) -> bool {
    let mut digits = text.chars().filter(|c| !matches!(c, '.' | ',' | ' ')).peekable();
    digits.peek().is_some() && digits.all(|c| c.is_ascii_digit())
}

/// d{1,2}[/-]d{1,2}[/-]d{2,4}
fn is_date_like(text: &str) -> bool {
    let parts: Vec<&str> = text.split(['/', '-']).collect();
    if parts.len() != 3 {
        return false;
    }
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let widths = [(1, 2), (1, 2), (2, 4)];

    parts
        .iter()
        .zip(widths)
        .all(|(part, (min, max))| all_digits(part) && (min..=max).contains(&part.len()))
}
