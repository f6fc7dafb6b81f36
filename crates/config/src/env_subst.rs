/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is so that validation can report them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next(); // '{'
        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }
        match (closed && !name.is_empty()).then(|| lookup(&name)).flatten() {
            Some(value) => result.push_str(&value),
            None => {
                result.push_str("${");
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            },
        }
    }

    result
}

/// Returns the names of `${...}` placeholders still present in `input`.
pub fn unresolved_placeholders(input: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            },
            _ => break,
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| (name == "HERALD_TEST_TOKEN").then(|| "123:abc".to_string());
        assert_eq!(
            substitute_env_with("token = \"${HERALD_TEST_TOKEN}\"", lookup),
            "token = \"123:abc\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${HERALD_NOPE}", |_| None),
            "${HERALD_NOPE}"
        );
    }

    #[test]
    fn malformed_placeholder_is_literal() {
        assert_eq!(substitute_env_with("a ${oops", |_| None), "a ${oops");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }

    #[test]
    fn lists_unresolved() {
        assert_eq!(
            unresolved_placeholders("x=${A} y=${B} z=${"),
            vec!["A".to_string(), "B".to_string()]
        );
    }
}
