//! Response shaping shared by the `/api` and `/api2` endpoints: JSONP
//! wrapping and the trailing double newline the original protocol expects.

/// Wrap a JSON body for the `callback`/`jsonp` query-parameter convention:
/// `name(body);\n\n` if a callback name was given, else `body\n\n`.
pub fn wrap_body(body: &str, jsonp_callback: Option<&str>) -> String {
    match jsonp_callback {
        Some(name) if !name.is_empty() => format!("{name}({body});\n\n"),
        _ => format!("{body}\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_callback_name() {
        assert_eq!(wrap_body("{}", Some("cb")), "cb({});\n\n");
    }

    #[test]
    fn plain_body_still_gets_trailing_newlines() {
        assert_eq!(wrap_body("{}", None), "{}\n\n");
    }
}
